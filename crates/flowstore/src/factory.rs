//! Session factory.
//!
//! Engine start-up builds one [`SessionFactory`] from the immutable
//! configuration and collaborators, verifies the schema once, then opens one
//! session per command.
//!
//! # Example
//!
//! ```rust,ignore
//! use flowstore::prelude::*;
//!
//! let factory = SessionFactory::builder(config)
//!     .with_dispatcher(Arc::new(my_dispatcher))
//!     .with_schema_requirements(SchemaRequirements::new("7.1.0"))
//!     .build();
//!
//! factory.verify_schema(&mut catalog)?;
//!
//! let mut session = factory.open_session(connection);
//! ```

use flowstore_core::{
    Error, EventDispatcher, IdGenerator, PersistenceConfig, Result, StatementExecutor,
};
use flowstore_schema::{SchemaIntrospector, SchemaReport, SchemaRequirements, check_schema};
use flowstore_session::{Session, SessionContext};
use std::sync::Arc;

/// Opens sessions that share one configuration and one set of collaborators.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    context: SessionContext,
    schema: Option<SchemaRequirements>,
}

impl SessionFactory {
    /// Factory with default collaborators and no schema check.
    pub fn new(config: PersistenceConfig) -> Self {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn builder(config: PersistenceConfig) -> SessionFactoryBuilder {
        SessionFactoryBuilder::new(config)
    }

    pub fn config(&self) -> &PersistenceConfig {
        self.context.config()
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Open a session that owns `executor` until it is closed or dropped.
    pub fn open_session<X: StatementExecutor>(&self, executor: X) -> Session<X> {
        Session::new(executor, self.context.clone())
    }

    /// Check the store against the configured schema requirements.
    ///
    /// Fails with a configuration error when the factory was built without
    /// requirements.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn verify_schema<I: SchemaIntrospector + ?Sized>(
        &self,
        introspector: &mut I,
    ) -> Result<SchemaReport> {
        let requirements = self
            .schema
            .as_ref()
            .ok_or_else(|| Error::Config("no schema requirements configured".into()))?;
        match check_schema(introspector, requirements) {
            Ok(report) => {
                tracing::info!(
                    version = %report.version,
                    tables = report.tables_found,
                    "Schema verified"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Schema verification failed");
                Err(e)
            }
        }
    }
}

/// Builder for [`SessionFactory`].
#[derive(Debug)]
pub struct SessionFactoryBuilder {
    context: SessionContext,
    schema: Option<SchemaRequirements>,
}

impl SessionFactoryBuilder {
    #[must_use]
    pub fn new(config: PersistenceConfig) -> Self {
        Self {
            context: SessionContext::new(Arc::new(config)),
            schema: None,
        }
    }

    /// Id source for entities inserted without an id. Defaults to UUID v4.
    #[must_use]
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.context = self.context.with_id_generator(id_generator);
        self
    }

    /// Receiver of deletion notifications. Defaults to a disabled dispatcher.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.context = self.context.with_dispatcher(dispatcher);
        self
    }

    #[must_use]
    pub fn with_schema_requirements(mut self, requirements: SchemaRequirements) -> Self {
        self.schema = Some(requirements);
        self
    }

    pub fn build(self) -> SessionFactory {
        tracing::debug!(
            dialect = %self.context.config().dialect(),
            schema_check = self.schema.is_some(),
            "Session factory built"
        );
        SessionFactory {
            context: self.context,
            schema: self.schema,
        }
    }
}
