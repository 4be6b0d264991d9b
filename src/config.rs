//! Command-line configuration for objflow.
//!
//! Options can be given as arguments or through environment variables with
//! the `OBJFLOW_` prefix:
//!
//! - `OBJFLOW_RAW` - Raw intensity frames, one file per time step (comma-separated)
//! - `OBJFLOW_BINARY` - Binary segmentation frames (comma-separated)
//! - `OBJFLOW_BACKGROUND` - Background value per channel (default: 0)
//! - `OBJFLOW_FEATURES` - Extra feature names (comma-separated)
//! - `OBJFLOW_OVERLAY_DIR` - Directory for center-overlay PNGs
//! - `OBJFLOW_TIMES` - Time steps to report (default: all)
//! - `OBJFLOW_CACHE_BLOCKS` - Max cached feature cells (default: unbounded)
//! - `OBJFLOW_SOLVER_PATH` - Extra directories searched by `check`

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::objects::Feature;

// =============================================================================
// CLI Arguments
// =============================================================================

/// objflow - Lazy object extraction for 5D images.
///
/// Labels a binary segmentation, computes per-object region features and
/// marks object centers, computing only what is requested.
#[derive(Parser, Debug, Clone)]
#[command(name = "objflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract objects and print their region features as JSON.
    Extract(ExtractConfig),

    /// Report optional capabilities and supported features.
    Check(CheckConfig),
}

// =============================================================================
// Extract Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ExtractConfig {
    /// Raw intensity frames, one grayscale image per time step.
    #[arg(long, num_args = 1.., value_delimiter = ',', required = true, env = "OBJFLOW_RAW")]
    pub raw: Vec<PathBuf>,

    /// Binary segmentation frames matching the raw frames.
    #[arg(long, num_args = 1.., value_delimiter = ',', required = true, env = "OBJFLOW_BINARY")]
    pub binary: Vec<PathBuf>,

    /// Background value of the binary image, one per channel.
    #[arg(long, value_delimiter = ',', env = "OBJFLOW_BACKGROUND")]
    pub background: Vec<u8>,

    /// Features computed on top of RegionCenter and the bounding box.
    #[arg(long, value_delimiter = ',', env = "OBJFLOW_FEATURES")]
    pub features: Vec<String>,

    /// Write the center overlay of every time step here.
    #[arg(long, env = "OBJFLOW_OVERLAY_DIR")]
    pub overlay_dir: Option<PathBuf>,

    /// Time steps to report. All time steps when empty.
    #[arg(long, value_delimiter = ',', env = "OBJFLOW_TIMES")]
    pub times: Vec<usize>,

    /// Maximum number of (t, c) feature cells kept in memory.
    #[arg(long, env = "OBJFLOW_CACHE_BLOCKS")]
    pub cache_blocks: Option<usize>,

    /// Pretty-print the JSON report.
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ExtractConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.raw.is_empty() {
            return Err("At least one raw frame is required. Set --raw or OBJFLOW_RAW".to_string());
        }
        if self.raw.len() != self.binary.len() {
            return Err(format!(
                "Got {} raw frame(s) but {} binary frame(s)",
                self.raw.len(),
                self.binary.len()
            ));
        }

        for name in &self.features {
            Feature::parse(name).map_err(|e| e.to_string())?;
        }

        if self.cache_blocks == Some(0) {
            return Err("cache_blocks must be greater than 0".to_string());
        }

        if let Some(&t) = self.times.iter().find(|&&t| t >= self.raw.len()) {
            return Err(format!(
                "Time step {} out of range for {} frame(s)",
                t,
                self.raw.len()
            ));
        }

        Ok(())
    }

    /// Background values, defaulting to 0 for a single channel.
    pub fn background_labels(&self) -> Vec<u8> {
        if self.background.is_empty() {
            vec![0]
        } else {
            self.background.clone()
        }
    }
}

// =============================================================================
// Check Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Directories searched for the solver wrapper before the defaults.
    #[arg(long, value_delimiter = ',', env = "OBJFLOW_SOLVER_PATH")]
    pub solver_path: Vec<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
