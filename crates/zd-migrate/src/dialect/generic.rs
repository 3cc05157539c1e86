//! Fallback dialect for databases without zero-downtime support.
//!
//! Only one-shot changes and plain check constraints are rendered; plans for
//! these databases never contain anything else.

use super::{quote, render_baseline, unsupported};
use crate::core::identifier::{quote_pg, validate_check_expression};
use crate::core::operation::Operation;
use crate::core::traits::Dialect;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct GenericDialect {
    name: String,
}

impl GenericDialect {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Dialect for GenericDialect {
    fn name(&self) -> &str {
        &self.name
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        // ANSI quoting
        quote_pg(name)
    }

    fn supports(&self, op: &Operation) -> bool {
        op.is_baseline()
            || matches!(
                op,
                Operation::AddCheckConstraint { .. } | Operation::DropConstraint { .. }
            )
    }

    fn render(&self, op: &Operation) -> Result<Vec<String>> {
        if let Some(sql) = render_baseline(op)? {
            return Ok(vec![sql]);
        }
        let sql = match op {
            // Validation cannot be deferred here; the constraint is checked
            // immediately.
            Operation::AddCheckConstraint {
                table,
                name,
                expression,
                ..
            } => {
                validate_check_expression(expression)?;
                format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({})",
                    table.render()?,
                    quote(name)?,
                    expression
                )
            }
            Operation::DropConstraint { table, name } => format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                table.render()?,
                quote(name)?
            ),
            _ => return Err(unsupported(&self.name, op)),
        };
        Ok(vec![sql])
    }
}
