//! SVG flamegraph output via inferno.

use super::create_output_file;
use crate::stack::CollapsedStack;
use crate::utils::error::OutputError;
use inferno::flamegraph::{self, Options, Palette};
use log::{debug, info, warn};
use std::io::Write;
use std::path::Path;

/// Flamegraph configuration
#[derive(Debug, Clone)]
pub struct FlamegraphConfig {
    pub title: String,

    /// Unit shown in frame tooltips
    pub count_name: String,

    /// inferno palette name (`python`, `hot`, ...)
    pub palette: String,

    pub width: Option<usize>,
}

impl Default for FlamegraphConfig {
    fn default() -> Self {
        Self {
            title: "Off-GIL Time Flame Graph".to_string(),
            count_name: "us".to_string(),
            palette: "python".to_string(),
            width: None,
        }
    }
}

impl FlamegraphConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Render collapsed stacks to an SVG string
///
/// # Errors
/// * `OutputError::InvalidPath` - nothing to render
/// * `OutputError::Flamegraph` - inferno rejected the input
pub fn render_flamegraph(
    stacks: &[CollapsedStack],
    config: &FlamegraphConfig,
) -> Result<String, OutputError> {
    if stacks.is_empty() {
        return Err(OutputError::InvalidPath(
            "no stacks to draw a flamegraph from".to_string(),
        ));
    }

    let mut options = Options::default();
    options.title = config.title.clone();
    options.count_name = config.count_name.clone();
    options.image_width = config.width;
    match config.palette.parse::<Palette>() {
        Ok(palette) => options.colors = palette,
        Err(_) => warn!("Unknown palette {}, using the default", config.palette),
    }

    let lines: Vec<String> = stacks.iter().map(CollapsedStack::to_line).collect();
    let mut svg = Vec::new();
    flamegraph::from_lines(&mut options, lines.iter().map(String::as_str), &mut svg)
        .map_err(|e| OutputError::Flamegraph(e.to_string()))?;

    debug!("Rendered flamegraph from {} stacks", stacks.len());
    String::from_utf8(svg).map_err(|e| {
        OutputError::WriteFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

/// Render and write a flamegraph file
pub fn write_flamegraph(
    stacks: &[CollapsedStack],
    config: &FlamegraphConfig,
    output_path: impl AsRef<Path>,
) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing SVG to: {}", output_path.display());

    if output_path.extension().map_or(true, |ext| ext != "svg") {
        debug!("File does not have .svg extension: {}", output_path.display());
    }

    let svg = render_flamegraph(stacks, config)?;
    let mut writer = create_output_file(output_path)?;
    writer.write_all(svg.as_bytes())?;
    writer.flush()?;

    info!(
        "SVG written successfully ({} bytes, {:.2} KB)",
        svg.len(),
        svg.len() as f64 / 1024.0
    );
    Ok(())
}
