//! Server error codes the client reacts to.

/// `ER_UNKNOWN_COM_ERROR`: the server does not understand the command.
pub const UNKNOWN_COMMAND: u16 = 1047;

/// `ER_PARSE_ERROR`: SQL syntax error.
pub const PARSE_ERROR: u16 = 1064;

/// `ER_BAD_HOST_ERROR`: the host could not be resolved or reached.
pub const UNABLE_TO_CONNECT_TO_HOST: u16 = 1042;

/// `ER_ACCESS_DENIED_ERROR`.
pub const ACCESS_DENIED: u16 = 1045;

/// `ER_QUERY_INTERRUPTED`: the running statement was killed.
pub const QUERY_INTERRUPTED: u16 = 1317;

/// `ER_SP_DOES_NOT_EXIST`: stored procedure not found.
pub const STORED_PROCEDURE_DOES_NOT_EXIST: u16 = 1305;

/// `ER_CLIENT_INTERACTION_TIMEOUT`: the server closed an idle session.
pub const CLIENT_INTERACTION_TIMEOUT: u16 = 4031;
