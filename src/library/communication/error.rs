use crate::library::BoxedError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Type erased, serializable error which retains the error chain information
///
/// Used wherever an error has to travel over the broker, most notably inside
/// [`DeadLetter`](super::event::DeadLetter) records. Services inspecting those records
/// do not know the concrete error types of the failing consumer but still get a
/// readable cause chain.
///
/// When the Error from which this is created contains another BlackboxError in its
/// source chain, it will be consumed and integrated so that one nicely formatted
/// stacktrace can be provided at the top-most level.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct BlackboxError(Vec<String>);

impl BlackboxError {
    /// Creates a new instance from any error type
    ///
    /// Due to std providing default implementations for the `From<T> where T: T` trait,
    /// we can't both implement `Error` and `From<Error>` and have to decide on one.
    pub fn new<E: Error + 'static>(e: E) -> Self {
        (&e as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance from a boxed error type
    pub fn from_boxed(e: &BoxedError) -> Self {
        (e.as_ref() as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance with a single cause
    pub fn from_message(message: impl Into<String>) -> Self {
        Self(vec![message.into()])
    }

    /// List of causes, outermost first
    pub fn causes(&self) -> &[String] {
        &self.0
    }
}

impl Error for BlackboxError {}

impl Display for BlackboxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut causes = self.0.iter();

        match causes.next() {
            Some(first) => write!(f, "{}", first)?,
            None => return write!(f, "unknown error"),
        }

        for cause in causes {
            write!(f, ": {}", cause)?;
        }

        Ok(())
    }
}

impl From<&(dyn Error + 'static)> for BlackboxError {
    fn from(e: &(dyn Error + 'static)) -> Self {
        let mut source: Option<&(dyn Error + 'static)> = Some(e);
        let mut causes: Vec<String> = Vec::new();

        while let Some(error) = source {
            // Integrate any child BlackboxErrors and use ToString for anything else
            if let Some(blackbox_error) = error.downcast_ref::<BlackboxError>() {
                causes.extend(blackbox_error.0.iter().cloned());
            } else {
                causes.push(error.to_string());
            }

            source = error.source();
        }

        Self(causes)
    }
}
