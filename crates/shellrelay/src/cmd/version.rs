use shellrelay_frame::{DEFAULT_MAX_LINE, DEFAULT_SCREENSHOT_LINE_LEN, DEFAULT_SEGMENT_SIZE};
use shellrelay_transport::DEFAULT_PORT;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("shellrelay {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: shellrelay");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "build_target: {}",
        option_env!("SHELLRELAY_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "build_profile: {}",
        option_env!("SHELLRELAY_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("default_port: {DEFAULT_PORT}");
    println!(
        "protocol: segment={DEFAULT_SEGMENT_SIZE} screenshot_line={DEFAULT_SCREENSHOT_LINE_LEN} max_line={DEFAULT_MAX_LINE}"
    );

    Ok(SUCCESS)
}
