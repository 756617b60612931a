//! Error types for the tsn compiler and runtime

use thiserror::Error;

/// Errors surfaced by the host-side binding API.
///
/// A failed bind aborts only that bind; previously registered bindings
/// remain valid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The return type of a bound function has not been registered
    #[error("Return type of function '{func}' is not bound")]
    FunctionReturnTypeUnbound {
        /// Function being bound
        func: String,
    },

    /// The receiver class of a bound method has not been registered
    #[error("Class of method '{method}' is not bound")]
    MethodClassUnbound {
        /// Method being bound
        method: String,
    },

    /// The return type of a bound method has not been registered
    #[error("Return type of method '{method}' is not bound")]
    MethodReturnTypeUnbound {
        /// Method being bound
        method: String,
    },

    /// An argument type has not been registered
    #[error("Type of argument {index} of '{func}' is not bound")]
    ArgTypeUnbound {
        /// Function being bound
        func: String,
        /// Zero-based explicit argument index
        index: usize,
    },

    /// An aggregate argument was passed by value
    ///
    /// Aggregates must be passed by reference or by pointer; only
    /// primitives may be passed by value.
    #[error("Argument {index} of '{func}' is an aggregate passed by value")]
    ArgStructPassByValue {
        /// Function being bound
        func: String,
        /// Zero-based explicit argument index
        index: usize,
    },

    /// A property with the same name was already bound on the type
    #[error("Property '{prop}' is already bound on type '{type_name}'")]
    PropAlreadyBound {
        /// Type being bound
        type_name: String,
        /// Conflicting property name
        prop: String,
    },

    /// The type of a bound property has not been registered
    #[error("Type of property '{prop}' on '{type_name}' is not bound")]
    PropTypeUnbound {
        /// Type being bound
        type_name: String,
        /// Property name
        prop: String,
    },

    /// A type with the same fully qualified name already exists
    #[error("Type '{type_name}' is already registered")]
    TypeAlreadyBound {
        /// Fully qualified name of the conflicting type
        type_name: String,
    },
}

/// Errors raised while a script executes on the VM.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Memory access outside the VM's buffer
    #[error("Memory access out of range: address {address:#x}, size {size}")]
    MemoryOutOfRange {
        /// Offending address
        address: u64,
        /// Access width in bytes
        size: u32,
    },

    /// Decoded instruction word is not a valid instruction
    #[error("Invalid instruction at {ip:#x}")]
    InvalidInstruction {
        /// Instruction address
        ip: u64,
    },

    /// Integer division or modulo by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Stack pointer left the stack region
    #[error("Stack overflow: stack pointer {sp:#x} exceeds stack size {stack_size:#x}")]
    StackOverflow {
        /// Stack pointer value
        sp: u64,
        /// Configured stack size
        stack_size: u64,
    },

    /// A call referenced a function id the runtime does not know
    #[error("Call to unknown function id {id}")]
    UnknownFunction {
        /// The unresolved function id
        id: u32,
    },

    /// A host object handle did not resolve to a live object
    #[error("Invalid host object handle {handle:#x}")]
    InvalidHandle {
        /// The stale or forged handle
        handle: u64,
    },

    /// A host thunk reported an error
    #[error("Host error in '{func}': {message}")]
    HostError {
        /// Host function that failed
        func: String,
        /// Error description
        message: String,
    },

    /// The advisory cancellation flag was observed
    #[error("Execution cancelled")]
    Cancelled,

    /// An error recorded on the execution context trace
    #[error("{0}")]
    Trace(String),
}

/// Top-level error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Host binding failed
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Compilation failed; the compiler log holds the individual messages
    #[error("Compilation failed with {error_count} error(s); first: {first}")]
    Compile {
        /// Number of errors logged
        error_count: usize,
        /// Rendered first error message
        first: String,
    },

    /// Script execution failed
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A host call was made with arguments that do not match the signature
    #[error("Call signature mismatch for '{func}': {reason}")]
    CallSignatureMismatch {
        /// Target function
        func: String,
        /// Why validation failed
        reason: String,
    },

    /// Cache or workspace I/O problem; callers fall back to a rebuild
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// Underlying I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;
