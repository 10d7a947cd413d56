use error::SMBError;

pub mod error;
pub mod logging;
pub mod nt_status;

pub type SMBResult<T> = Result<T, SMBError>;

pub type SMBParseResult<I, O> = SMBResult<(I, O)>;
