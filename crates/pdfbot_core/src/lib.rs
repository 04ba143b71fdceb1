pub mod domain;
pub mod machine;
pub mod ports;
pub mod validation;

pub use domain::{
    ChatAction, ChatId, Ending, IncomingFile, InputClass, JobId, JobOutput, JobRequest, Keyboard,
    Notice, ParamValue, Parameter, ParameterKind, Params, Reply, Session, SessionState,
    TransformKind,
};
pub use machine::{Effect, Event, Transition};
pub use ports::{
    ChatTransport, ConversionService, GatewayError, GatewayResult, PortError, PortResult,
};
pub use validation::Limits;
