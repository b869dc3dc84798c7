//! Runs one of the bundled Vulkan samples in a window.
//!
//! ```bash
//! vk-samples --sample cube --resources ./resource
//! RUST_LOG=debug vk-samples --sample texture --validation --max-frames 300
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use vk_lifecycle::{window, HostConfig, SampleKind, SampleRenderer};

#[derive(Parser, Debug)]
#[command(name = "vk-samples", about = "Vulkan lifecycle samples")]
struct Args {
    /// Sample to run
    #[arg(long, value_enum, default_value_t = SampleKind::Triangle)]
    sample: SampleKind,

    /// Directory containing simpleVS.spv, simpleFS.spv and texture.tga
    #[arg(long, default_value = "resource")]
    resources: PathBuf,

    /// Window width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Window height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Disable vertical sync
    #[arg(long)]
    no_vsync: bool,

    /// Enable the Khronos validation layer
    #[arg(long)]
    validation: bool,

    /// Exit after this many frames
    #[arg(long)]
    max_frames: Option<u64>,
}

impl Args {
    fn host_config(&self) -> HostConfig {
        HostConfig {
            title: format!("vk-samples: {:?}", self.sample),
            width: self.width,
            height: self.height,
            vsync: !self.no_vsync,
            validation: self.validation,
            max_frames: self.max_frames,
            resource_dir: self.resources.clone(),
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.host_config();
    let mut renderer = SampleRenderer::new(args.sample.config(&config.resource_dir));

    match window::run(&config, &mut renderer) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
