//! Grouping invocation.
//!
//! Calls the server-side grouping procedure for one application. The result
//! payload is ignored; only success or failure matters.

use crate::error::QueryError;
use crate::graph::{GraphSession, Statement};

/// Procedure called when none is configured
pub const DEFAULT_PROCEDURE: &str = "demeter.groupTags";

#[derive(Debug, Clone)]
pub struct GroupingInvoker {
    procedure: String,
}

impl Default for GroupingInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_PROCEDURE)
    }
}

impl GroupingInvoker {
    #[must_use]
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
        }
    }

    #[must_use]
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    #[must_use]
    pub fn statement(&self, application: &str) -> Statement {
        Statement::new(format!("CALL {}($application)", self.procedure))
            .param("application", application)
    }

    /// Group the tagged objects of `application`. No retry.
    pub async fn invoke(
        &self,
        session: &dyn GraphSession,
        application: &str,
    ) -> Result<(), QueryError> {
        session.run(&self.statement(application)).await.map(|_| ())
    }
}
