use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// ND-100/ND-110 hardware sub-model. Carried as configuration metadata only
/// -- the instruction and MMU semantics implemented here do not vary by CPU
/// sub-model in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuType {
    Nd1,
    Nd4,
    Nd10,
    Nd100,
    Nd100Ce,
    Nd100Cx,
    Nd110,
    Nd110Ce,
    Nd110Cx,
    Nd110Pcx,
}

impl Default for CpuType {
    fn default() -> Self {
        CpuType::Nd100
    }
}

/// Memory-management system hardware: MMS1 (legacy, 4 page tables, 16-bit
/// PTEs) or MMS2 (extended, up to 16 page tables, 32-bit PTEs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MmsType {
    Mms1,
    Mms2,
}

impl Default for MmsType {
    fn default() -> Self {
        MmsType::Mms2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootMethod {
    Bp,
    Bpun,
    Aout,
    Floppy,
    Smd,
}

impl std::str::FromStr for BootMethod {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bp" => Ok(BootMethod::Bp),
            "bpun" => Ok(BootMethod::Bpun),
            "aout" => Ok(BootMethod::Aout),
            "floppy" => Ok(BootMethod::Floppy),
            "smd" => Ok(BootMethod::Smd),
            other => Err(ConfigError::UnknownBootMethod(other.to_string())),
        }
    }
}

/// Default memory size in 16-bit words (2 Mi words, matching the typical
/// configuration the source documents).
pub const DEFAULT_MEMORY_WORDS: usize = 1 << 21;

/// Boot and machine configuration for a `Vm`. Constructed from CLI flags
/// and/or an optional YAML config file (`--config=FILE`); CLI flags
/// override file-supplied defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub cpu_type: CpuType,
    pub mms_type: MmsType,
    pub memory_words: usize,
    pub boot_method: BootMethod,
    pub image_path: Option<PathBuf>,
    pub start_address: u16,
    pub disasm_enabled: bool,
    pub debugger_enabled: bool,
    pub verbose: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            cpu_type: CpuType::default(),
            mms_type: MmsType::default(),
            memory_words: DEFAULT_MEMORY_WORDS,
            boot_method: BootMethod::Bpun,
            image_path: None,
            start_address: 0,
            disasm_enabled: false,
            debugger_enabled: false,
            verbose: false,
        }
    }
}

/// Subset of `Configuration` that may be supplied by a YAML config file.
/// Every field is optional so a file may set only what it cares about.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    cpu_type: Option<CpuType>,
    mms_type: Option<MmsType>,
    memory_words: Option<usize>,
    start_address: Option<u16>,
}

impl Configuration {
    pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.cpu_type {
            self.cpu_type = v;
        }
        if let Some(v) = file.mms_type {
            self.mms_type = v;
        }
        if let Some(v) = file.memory_words {
            self.memory_words = v;
        }
        if let Some(v) = file.start_address {
            self.start_address = v;
        }
    }
}

/// Command-line surface: `--boot/--image/--start/--disasm/--debugger/--verbose`.
#[derive(Debug, Parser)]
#[command(name = "nd100vm", about = "ND-100/ND-110 minicomputer core emulator")]
pub struct Cli {
    /// Boot method
    #[arg(long, default_value = "bpun")]
    pub boot: String,
    /// Path to an optional YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Image path to load
    #[arg(long)]
    pub image: Option<PathBuf>,
    /// Initial P value
    #[arg(long, default_value_t = 0)]
    pub start: u16,
    /// Write annotated disassembly while running
    #[arg(long, default_value_t = false)]
    pub disasm: bool,
    /// Enable the debugger thread
    #[arg(long, default_value_t = false)]
    pub debugger: bool,
    /// Diagnostic output
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_configuration(self) -> Result<Configuration, ConfigError> {
        let mut config = Configuration::default();
        if let Some(path) = &self.config {
            config.apply_file(Configuration::load_file(path)?);
        }
        config.boot_method = self.boot.parse()?;
        config.image_path = self.image;
        config.start_address = self.start;
        config.disasm_enabled = self.disasm;
        config.debugger_enabled = self.debugger;
        config.verbose = self.verbose;
        Ok(config)
    }
}
