//! View rename: a second view with the same definition is created under the
//! new name and the old one is dropped at contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_identifier, finish_validation, ExpandContract};
use crate::core::identifier::TableRef;
use crate::core::operation::Operation;
use crate::core::traits::Introspector;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameView {
    pub view: TableRef,
    pub new_name: String,
}

impl RenameView {
    fn new_view(&self) -> TableRef {
        self.view.sibling(&self.new_name)
    }
}

#[async_trait]
impl ExpandContract for RenameView {
    fn name(&self) -> &'static str {
        "rename_view"
    }

    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_identifier("view", &self.view.name, &mut errors);
        if let Some(schema) = &self.view.schema {
            check_identifier("schema", schema, &mut errors);
        }
        check_identifier("new_view", &self.new_name, &mut errors);
        if !self.view.name.is_empty() && self.view.name == self.new_name {
            errors.push(format!("View {} cannot be renamed to itself", self.view));
        }
        finish_validation(self.name(), errors)
    }

    fn original(&self) -> Vec<Operation> {
        vec![Operation::RenameView {
            view: self.view.clone(),
            new_name: self.new_name.clone(),
        }]
    }

    fn original_inverse(&self) -> Result<Vec<Operation>> {
        Ok(vec![Operation::RenameView {
            view: self.new_view(),
            new_name: self.view.name.clone(),
        }])
    }

    async fn expand(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        let descriptor = catalog.describe_view(&self.view).await?;
        Ok(vec![Operation::CreateView {
            view: self.new_view(),
            definition: descriptor.definition,
        }])
    }

    async fn contract(&self, _catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        Ok(vec![Operation::DropView {
            view: self.view.clone(),
        }])
    }

    async fn expand_inverse(&self, _catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        Ok(vec![Operation::DropView {
            view: self.new_view(),
        }])
    }
}
