use thiserror::Error;

/// Fatal problems with the specification itself.
///
/// These are raised while loading namespaces; a registry that loaded
/// successfully never produces them later.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("no specification namespaces supplied")]
    Empty,

    #[error("cannot read specification {origin}: {source}")]
    Io {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed specification {origin}: {message}")]
    Malformed { origin: String, message: String },

    #[error("duplicate namespace `{0}`")]
    DuplicateNamespace(String),

    #[error("unknown namespace `{0}`")]
    UnknownNamespace(String),

    #[error("invalid member id `{id}` at {context}: {message}")]
    InvalidMemberId {
        id: String,
        context: String,
        message: String,
    },

    #[error("unresolved type reference `{reference}` at {context}")]
    UnresolvedType { reference: String, context: String },

    #[error("merge cycle: {}", cycle.join(" -> "))]
    MergeCycle { cycle: Vec<String> },

    #[error("invalid autogen directive at {context}: {message}")]
    InvalidAutogen { context: String, message: String },

    #[error("invalid value at {context}: {message}")]
    InvalidValue { context: String, message: String },
}
