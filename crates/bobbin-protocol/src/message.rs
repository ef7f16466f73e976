//! Request and response messages.
//!
//! Field tags follow the build tool's `worker_protocol.proto`, and the serde
//! names follow its JSON mapping, so either encoding interoperates with
//! existing clients.

use serde::{Deserialize, Serialize};

/// Request id reserved for legacy singleplex requests.
pub const SINGLEPLEX_REQUEST_ID: i32 = 0;

/// Verbosity at or above which the build tool asks for detailed diagnostics.
pub const VERBOSE_THRESHOLD: i32 = 10;

/// A unit of work sent by the build tool.
///
/// # Example
///
/// ```
/// use bobbin_protocol::{Input, WorkRequest};
///
/// let request = WorkRequest::new(7, vec!["--flagfile=x.params".into()])
///     .with_inputs(vec![Input::new("prefix/a.class")]);
/// assert_eq!(request.request_id(), 7);
/// assert!(!request.is_singleplex());
/// assert_eq!(request.inputs().len(), 1);
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, prost::Message)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkRequest {
    #[prost(int32, tag = "3")]
    request_id: i32,
    #[prost(string, repeated, tag = "1")]
    arguments: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    inputs: Vec<Input>,
    #[prost(string, optional, tag = "6")]
    #[serde(rename = "sandboxDir", skip_serializing_if = "Option::is_none")]
    sandbox: Option<String>,
    #[prost(bool, tag = "4")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    cancel: bool,
    #[prost(int32, tag = "5")]
    #[serde(skip_serializing_if = "is_zero")]
    verbosity: i32,
}

const fn is_zero(value: &i32) -> bool {
    *value == 0
}

impl WorkRequest {
    /// Creates a request with the given id and arguments.
    #[must_use]
    pub fn new(request_id: i32, arguments: Vec<String>) -> Self {
        Self {
            request_id,
            arguments,
            ..Self::default()
        }
    }

    /// Creates a cancellation notification for `request_id`.
    #[must_use]
    pub fn cancel(request_id: i32) -> Self {
        Self {
            request_id,
            cancel: true,
            ..Self::default()
        }
    }

    /// Attaches the declared inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Vec<Input>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Attaches a sandbox directory.
    #[must_use]
    pub fn with_sandbox_dir(mut self, sandbox_dir: impl Into<String>) -> Self {
        self.sandbox = Some(sandbox_dir.into());
        self
    }

    /// Sets the requested verbosity.
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: i32) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Identifier correlating the request with its response.
    #[must_use]
    pub const fn request_id(&self) -> i32 {
        self.request_id
    }

    /// Whether this is a legacy singleplex request.
    #[must_use]
    pub const fn is_singleplex(&self) -> bool {
        self.request_id == SINGLEPLEX_REQUEST_ID
    }

    /// Ordered task arguments.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Declared inputs.
    #[must_use]
    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Sandbox directory the task should resolve relative paths against.
    #[must_use]
    pub fn sandbox_dir(&self) -> Option<&str> {
        self.sandbox.as_deref()
    }

    /// Whether this message cancels a previously sent request.
    #[must_use]
    pub const fn is_cancel(&self) -> bool {
        self.cancel
    }

    /// Verbosity requested by the build tool.
    #[must_use]
    pub const fn verbosity(&self) -> i32 {
        self.verbosity
    }

    /// Whether the build tool asked for detailed diagnostics.
    #[must_use]
    pub const fn is_verbose(&self) -> bool {
        self.verbosity >= VERBOSE_THRESHOLD
    }
}

/// A file the task reads, as declared by the build tool.
///
/// The digest is carried through unchanged; the worker itself never inspects
/// it. JSON frames carry it base64-encoded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, prost::Message)]
#[serde(default)]
pub struct Input {
    #[prost(string, tag = "1")]
    path: String,
    #[prost(bytes = "vec", tag = "2")]
    #[serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    digest: Vec<u8>,
}

impl Input {
    /// Creates an input without a digest.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            digest: Vec::new(),
        }
    }

    /// Attaches the digest reported by the build tool.
    #[must_use]
    pub fn with_digest(mut self, digest: impl Into<Vec<u8>>) -> Self {
        self.digest = digest.into();
        self
    }

    /// Path of the input, relative to the execution root or sandbox.
    #[must_use]
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    /// Digest of the input contents, if supplied.
    #[must_use]
    pub fn digest(&self) -> Option<&[u8]> {
        (!self.digest.is_empty()).then_some(self.digest.as_slice())
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(D::Error::custom)
    }
}

/// The single answer to an admitted [`WorkRequest`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, prost::Message)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkResponse {
    #[prost(int32, tag = "3")]
    request_id: i32,
    #[prost(int32, tag = "1")]
    exit_code: i32,
    #[prost(string, tag = "2")]
    output: String,
    #[prost(bool, tag = "4")]
    was_cancelled: bool,
}

impl WorkResponse {
    /// Creates the response for a request that ran to completion.
    #[must_use]
    pub fn completed(request_id: i32, exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            request_id,
            exit_code,
            output: output.into(),
            was_cancelled: false,
        }
    }

    /// Creates the contentless response for a cancelled request.
    #[must_use]
    pub const fn cancelled(request_id: i32) -> Self {
        Self {
            request_id,
            exit_code: 0,
            output: String::new(),
            was_cancelled: true,
        }
    }

    /// Identifier of the request this response answers.
    #[must_use]
    pub const fn request_id(&self) -> i32 {
        self.request_id
    }

    /// Task exit code; zero means success.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Diagnostic text shown to the user by the build tool.
    #[must_use]
    pub fn output(&self) -> &str {
        self.output.as_str()
    }

    /// Whether the request was cancelled before its result was reported.
    #[must_use]
    pub const fn was_cancelled(&self) -> bool {
        self.was_cancelled
    }
}
