//! Reference executor shipped with the binary.

use std::fmt::Write as _;

use bobbin_protocol::WorkRequest;

use super::{TaskContext, TaskError, TaskExecutor};

const FLAGFILE_PREFIX: &str = "--flagfile=";
const DIRECTIVE_SEPARATOR: char = '|';

/// Reports what a request asked for without doing any work.
///
/// The first argument carries a `|`-separated directive, optionally behind
/// a `--flagfile=<path>|` prefix, e.g.
/// `--flagfile=x.params|jar|out.jar|prefix`. The executor answers with the
/// directive name, its operands and the number of inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoExecutor;

impl EchoExecutor {
    fn directive(argument: &str) -> Vec<&str> {
        let mut parts: Vec<&str> = argument.split(DIRECTIVE_SEPARATOR).collect();
        if parts
            .first()
            .is_some_and(|first| first.starts_with(FLAGFILE_PREFIX))
        {
            parts.remove(0);
        }
        parts.retain(|part| !part.is_empty());
        parts
    }
}

impl TaskExecutor for EchoExecutor {
    fn execute(
        &self,
        request: &WorkRequest,
        context: &TaskContext,
        output: &mut String,
    ) -> Result<i32, TaskError> {
        let Some(argument) = request.arguments().first() else {
            output.push_str("no directive given");
            return Ok(2);
        };
        let parts = Self::directive(argument);
        let Some((name, operands)) = parts.split_first() else {
            let _ = write!(output, "empty directive in {argument:?}");
            return Ok(2);
        };
        let _ = write!(
            output,
            "{name}: {} ({} inputs)",
            operands.join(" "),
            request.inputs().len()
        );
        if context.verbosity() > 0 {
            for input in request.inputs() {
                let _ = write!(output, "\n  {}", input.path());
            }
        }
        Ok(0)
    }
}
