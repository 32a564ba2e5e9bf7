//! Crate-level error type. Input-shape problems are recoverable per
//! section; everything else aborts the run with a message on stderr.

/// Errors surfaced to the host and the CLI.
#[derive(Debug)]
pub enum OptError {
    /// Section byte length is not a multiple of the 8-byte slot size.
    SectionSize { section: String, len: usize },
    /// A slot failed to decode.
    BadInstruction {
        section: String,
        index: usize,
        detail: String,
    },
    /// The container file is not a usable ELF64 object.
    Elf(String),
    Io(std::io::Error),
}

impl std::fmt::Display for OptError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OptError::SectionSize { section, len } => write!(
                f,
                "section {}: byte length {} is not a multiple of 8",
                section, len
            ),
            OptError::BadInstruction {
                section,
                index,
                detail,
            } => write!(
                f,
                "section {}: failed to parse instruction at {}: {}",
                section, index, detail
            ),
            OptError::Elf(msg) => write!(f, "{}", msg),
            OptError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for OptError {}

impl From<std::io::Error> for OptError {
    fn from(e: std::io::Error) -> Self {
        OptError::Io(e)
    }
}
