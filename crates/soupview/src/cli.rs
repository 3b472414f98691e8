use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use shading::gpu::DEFAULT_TEXTURE_UNITS;

#[derive(Parser, Debug)]
#[command(
    name = "soupview",
    author,
    version,
    about = "Runs a soup 3D scene headlessly against a recording GPU backend"
)]
pub struct Cli {
    /// Scene description (TOML).
    #[arg(value_name = "SCENE")]
    pub scene: PathBuf,

    /// Number of frames to run.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub frames: u32,

    /// Override the projection viewport (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT")]
    pub size: Option<String>,

    /// Texture units the recording backend exposes.
    #[arg(
        long,
        value_name = "UNITS",
        default_value_t = DEFAULT_TEXTURE_UNITS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub texture_units: u32,

    /// Print the frame reports and the recorded command log as JSON.
    #[arg(long, conflicts_with = "graph")]
    pub json: bool,

    /// Print every material graph as a mermaid flowchart instead of rendering.
    #[arg(long)]
    pub graph: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_viewport_size(spec: &str) -> Result<(u32, u32)> {
    let trimmed = spec.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow::anyhow!("expected WxH format, e.g. 1920x1080"))?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid width in viewport size"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid height in viewport size"))?;

    if width == 0 || height == 0 {
        anyhow::bail!("viewport dimensions must be greater than zero");
    }

    Ok((width, height))
}
