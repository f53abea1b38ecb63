//! SchemaBuilder — the adjust → validate → build pipeline shared by every
//! schema flavor.
//!
//! Implementors supply storage (`schema`/`schema_mut`) and `validate`;
//! `adjust` is optional. [`SchemaBuilder::build`] always validates the
//! schema it is about to return, i.e. the adjusted one.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::{AipiError, Result};

/// Outcome of a validation pass. Empty `errors` means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self { errors }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Options for [`SchemaBuilder::build`]. Everything is on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Build from a copy, leaving the builder's schema in place. When off
    /// the schema is moved out of the builder.
    pub copy: bool,
    pub adjust: bool,
    pub validate: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            copy: true,
            adjust: true,
            validate: true,
        }
    }
}

impl BuildOptions {
    pub fn without_validation() -> Self {
        Self {
            validate: false,
            ..Default::default()
        }
    }
}

pub trait SchemaBuilder {
    type Schema: Clone + Default;

    fn schema(&self) -> &Self::Schema;

    fn schema_mut(&mut self) -> &mut Self::Schema;

    /// Pure check of `schema`.
    fn validate(&self, schema: &Self::Schema) -> ValidationReport;

    /// Rewrite a schema into the builder's profile. Identity by default.
    fn adjust(&self, schema: Self::Schema) -> Self::Schema {
        schema
    }

    fn set_schema(&mut self, schema: Self::Schema) {
        *self.schema_mut() = schema;
    }

    fn mutate<F>(&mut self, mutator: F) -> &mut Self
    where
        F: FnOnce(Self::Schema) -> Self::Schema,
        Self: Sized,
    {
        let current = std::mem::take(self.schema_mut());
        *self.schema_mut() = mutator(current);
        self
    }

    /// Errors of the current schema, optionally after `adjust`.
    fn errors(&self, adjust: bool) -> Vec<String> {
        if adjust {
            let adjusted = self.adjust(self.schema().clone());
            self.validate(&adjusted).errors
        } else {
            self.validate(self.schema()).errors
        }
    }

    fn is_valid(&self, adjust: bool) -> bool {
        self.errors(adjust).is_empty()
    }

    /// Copy (or take), adjust, then validate the result. Validation
    /// failures carry the error list in `data.errors`.
    fn build(&mut self, options: BuildOptions) -> Result<Self::Schema> {
        let mut result = if options.copy {
            self.schema().clone()
        } else {
            std::mem::take(self.schema_mut())
        };

        if options.adjust {
            result = self.adjust(result);
        }

        if options.validate {
            let report = self.validate(&result);
            if !report.is_valid() {
                return Err(AipiError::new("Schema validation failed")
                    .with_data(json!({ "errors": report.errors })));
            }
        }

        Ok(result)
    }
}
