//! Error types for the session controller.

use std::fmt;

use crate::media::MediaKind;
use crate::session::Direction;
use crate::state::PipelineState;

/// Errors that can occur in the session controller.
///
/// Variants map to the failure classes of the controller:
///
/// - **Configuration**: [`Configuration`](Self::Configuration): start inputs
///   missing or contradictory. Returned synchronously from `start`.
/// - **Graph**: [`GraphConstruction`](Self::GraphConstruction): an element
///   could not be created or linked. Reported through
///   [`SessionEvent::Error`](crate::session::SessionEvent::Error).
/// - **Negotiation**: [`Payload`](Self::Payload),
///   [`CapsParse`](Self::CapsParse): descriptor/structure translation.
/// - **Lifecycle**: [`NotIdle`](Self::NotIdle),
///   [`NotRunning`](Self::NotRunning),
///   [`InvalidTransition`](Self::InvalidTransition).
///
/// Frame validation failures live in
/// [`FrameError`](crate::media::FrameError).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Underlying I/O error (worker thread spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(ConfigErrorKind),

    #[error("{direction} graph construction failed: {kind}")]
    GraphConstruction {
        direction: Direction,
        kind: GraphErrorKind,
    },

    #[error("payload negotiation error: {0}")]
    Payload(PayloadErrorKind),

    #[error("capability parse error: {kind}")]
    CapsParse { kind: CapsParseErrorKind },

    /// Configuration setters are only legal while the direction is Idle.
    #[error("{direction} is {state}, configuration requires idle")]
    NotIdle {
        direction: Direction,
        state: PipelineState,
    },

    /// Packets can only be injected into a starting or running receiver.
    #[error("{0} is not running")]
    NotRunning(Direction),

    #[error("illegal {direction} transition {from} -> {to}")]
    InvalidTransition {
        direction: Direction,
        from: PipelineState,
        to: PipelineState,
    },

    /// [`send_packet`](crate::session::MediaSession::send_packet) without a
    /// registered transport sink.
    #[error("no transport sink registered")]
    NoTransport,

    /// The worker context has already shut down.
    #[error("worker context is gone")]
    WorkerGone,
}

/// Specific kind of configuration failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Producer has neither a device selector nor a file path.
    MissingProducerInput,
    /// Producer has both device selectors and a file path.
    ConflictingProducerInputs,
    /// Receiver has no remote payload descriptor at all.
    MissingRemotePayload,
    /// A remote payload descriptor was supplied without a negotiated payload type.
    UnsetPayloadType(MediaKind),
    /// A remote payload descriptor was supplied for the wrong media kind.
    PayloadKindMismatch { expected: MediaKind, found: MediaKind },
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProducerInput => write!(f, "no device selector or file path given"),
            Self::ConflictingProducerInputs => {
                write!(f, "device selectors and file path are mutually exclusive")
            }
            Self::MissingRemotePayload => write!(f, "no remote payload descriptor given"),
            Self::UnsetPayloadType(kind) => {
                write!(f, "remote {kind} payload type is not negotiated")
            }
            Self::PayloadKindMismatch { expected, found } => {
                write!(f, "expected {expected} payload descriptor, got {found}")
            }
        }
    }
}

/// Coarse graph construction error code, also carried by
/// [`SessionEvent::Error`](crate::session::SessionEvent::Error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// The provider could not create the named element factory.
    ElementUnavailable(String),
    /// Two stages could not be linked.
    LinkFailed(String),
    /// Every requested branch turned out to be unavailable.
    NoActiveBranch,
    /// A payloader never reported its output capabilities.
    NegotiationFailed(MediaKind),
    /// No depayloader/decoder pair is known for a remote encoding.
    UnsupportedEncoding(String),
    /// A capture or file source refused to start.
    SourceFailed(String),
    /// A graph-internal thread could not be spawned.
    ThreadSpawn(String),
    /// The session closed while the graph was still being built.
    Cancelled,
}

impl fmt::Display for GraphErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElementUnavailable(name) => write!(f, "element '{name}' unavailable"),
            Self::LinkFailed(what) => write!(f, "link failed: {what}"),
            Self::NoActiveBranch => write!(f, "no media branch could be built"),
            Self::NegotiationFailed(kind) => write!(f, "{kind} payloader caps not negotiated"),
            Self::UnsupportedEncoding(name) => write!(f, "unsupported encoding '{name}'"),
            Self::SourceFailed(what) => write!(f, "source failed: {what}"),
            Self::ThreadSpawn(what) => write!(f, "could not spawn thread: {what}"),
            Self::Cancelled => write!(f, "construction cancelled"),
        }
    }
}

/// Specific kind of descriptor <-> structure translation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadErrorKind {
    /// Structure name is not `application/x-rtp`.
    NotRtp(String),
    /// The `media` field is missing or not `audio`/`video`.
    InvalidMedia,
    /// The `payload` field is missing (or the descriptor is unset).
    MissingPayloadType,
    /// Payload type outside `0..=127`.
    PayloadTypeOutOfRange(i32),
    /// Dynamic payload types (96 and above) require an encoding name.
    MissingEncodingName(i32),
    /// A `configuration` parameter could not be converted.
    InvalidConfiguration,
    /// A free-form parameter uses the name of a dedicated structure field.
    ReservedParameter(String),
}

impl fmt::Display for PayloadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRtp(name) => write!(f, "structure '{name}' is not application/x-rtp"),
            Self::InvalidMedia => write!(f, "missing or unknown media field"),
            Self::MissingPayloadType => write!(f, "payload type not set"),
            Self::PayloadTypeOutOfRange(pt) => write!(f, "payload type {pt} out of range"),
            Self::MissingEncodingName(pt) => {
                write!(f, "dynamic payload type {pt} requires an encoding name")
            }
            Self::InvalidConfiguration => write!(f, "invalid configuration parameter"),
            Self::ReservedParameter(name) => write!(f, "parameter name '{name}' is reserved"),
        }
    }
}

/// Specific kind of capability text parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapsParseErrorKind {
    /// Input was empty.
    Empty,
    /// A field had no `=` separator.
    MissingEquals,
    /// A field value had no `(type)` annotation or an unknown type.
    UnknownType,
    /// An integer field did not parse.
    InvalidNumber,
    /// A quoted string was not terminated.
    UnterminatedString,
}

impl fmt::Display for CapsParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty structure"),
            Self::MissingEquals => write!(f, "field without '='"),
            Self::UnknownType => write!(f, "missing or unknown value type"),
            Self::InvalidNumber => write!(f, "invalid number"),
            Self::UnterminatedString => write!(f, "unterminated string"),
        }
    }
}

/// Convenience alias for `Result<T, SessionError>`.
pub type Result<T> = std::result::Result<T, SessionError>;
