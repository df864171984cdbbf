use std::io;
use thiserror::Error;

/// Errors surfaced to the front-end. The in-VM interrupt taxonomy (MPV, page
/// fault, illegal instruction, ...) is never represented here: those are
/// emulated-hardware events handled entirely inside `Vm::run`, not failures
/// of the host program.
#[derive(Error, Debug)]
pub enum VmError {
    #[error("failed to load image: {0}")]
    ImageLoad(#[from] LoadError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("malformed BPUN state transition: {0}")]
    MalformedBpun(&'static str),
    #[error("a.out header too short: got {got} bytes, need {need}")]
    ShortAoutHeader { got: usize, need: usize },
    #[error("a.out magic number {0:#06x} not recognized")]
    BadMagic(u16),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown boot method {0:?}")]
    UnknownBootMethod(String),
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: String, source: io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}
