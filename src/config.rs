//! Pool configuration: the mutable pre-initialization snapshot and the
//! immutable resolved form shared by every builder the pool constructs.

use std::collections::HashMap;
use std::sync::Arc;

use libc::c_int;

use crate::error::{PoolError, Result};
use crate::handler::{EntityResolver, ErrorHandler, LoggingErrorHandler};
use crate::libxml2::{
    Schema, XML_PARSE_DTDLOAD, XML_PARSE_DTDVALID, XML_PARSE_NOBLANKS, XML_PARSE_NOCDATA,
    XML_PARSE_NOENT, XML_PARSE_NONET, XML_PARSE_NSCLEAN, XML_PARSE_XINCLUDE,
};

/// Feature names accepted by `set_feature`. Each maps onto one of the named
/// configuration flags.
pub mod features {
    pub const COALESCING: &str = "coalescing";
    pub const DTD_VALIDATING: &str = "dtd-validating";
    pub const EXPAND_ENTITY_REFERENCES: &str = "expand-entity-references";
    pub const IGNORE_COMMENTS: &str = "ignore-comments";
    pub const IGNORE_ELEMENT_CONTENT_WHITESPACE: &str = "ignore-element-content-whitespace";
    pub const NAMESPACE_AWARE: &str = "namespace-aware";
    pub const XINCLUDE_AWARE: &str = "xinclude-aware";
}

/// Attribute keys accepted by `set_attribute`.
pub mod attributes {
    /// Must be [`crate::config::XML_SCHEMA_LANGUAGE_URI`] when present.
    pub const SCHEMA_LANGUAGE: &str = "schema-language";
    /// Filesystem path to a schema document, compiled at initialization.
    pub const SCHEMA_SOURCE: &str = "schema-source";
}

/// The only schema language this pool supports.
pub const XML_SCHEMA_LANGUAGE_URI: &str = "http://www.w3.org/2001/XMLSchema";

/// Default bound on the idle builder cache.
pub const DEFAULT_MAX_POOL_SIZE: usize = 5;

/// Mutable configuration snapshot, frozen when the pool is initialized.
#[derive(Clone)]
pub struct BuilderConfig {
    pub(crate) max_pool_size: usize,
    pub(crate) coalescing: bool,
    pub(crate) dtd_validating: bool,
    pub(crate) expand_entity_references: bool,
    pub(crate) ignore_comments: bool,
    pub(crate) ignore_element_content_whitespace: bool,
    pub(crate) namespace_aware: bool,
    pub(crate) xinclude_aware: bool,
    pub(crate) schema: Option<Schema>,
    pub(crate) attributes: HashMap<String, String>,
    pub(crate) features: HashMap<String, bool>,
    pub(crate) entity_resolver: Option<Arc<dyn EntityResolver>>,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            coalescing: false,
            dtd_validating: false,
            // Entity expansion is on by default, matching common DOM factories.
            expand_entity_references: true,
            ignore_comments: false,
            ignore_element_content_whitespace: false,
            namespace_aware: false,
            xinclude_aware: false,
            schema: None,
            attributes: HashMap::new(),
            features: HashMap::new(),
            entity_resolver: None,
            error_handler: Arc::new(LoggingErrorHandler),
        }
    }
}

impl BuilderConfig {
    /// Replace the validation schema.
    ///
    /// A non-null schema forces namespace awareness and discards any raw
    /// schema attributes that would conflict with the compiled schema.
    pub(crate) fn set_schema(&mut self, schema: Option<Schema>) {
        if schema.is_some() {
            self.namespace_aware = true;
            self.attributes.remove(attributes::SCHEMA_SOURCE);
            self.attributes.remove(attributes::SCHEMA_LANGUAGE);
        }
        self.schema = schema;
    }

    /// Set one attribute. Empty keys are filtered out silently.
    pub(crate) fn set_attribute(&mut self, key: String, value: String) {
        if !key.is_empty() {
            self.attributes.insert(key, value);
        }
    }

    /// Set one feature. Empty keys are filtered out silently. The name is
    /// validated when the pool is initialized, not here.
    pub(crate) fn set_feature(&mut self, name: String, value: bool) {
        if !name.is_empty() {
            self.features.insert(name, value);
        }
    }

    /// Validate the snapshot and produce the immutable resolved form.
    ///
    /// Unknown feature or attribute keys, an unsupported schema language, an
    /// unreadable schema source, and conflicting schema configuration are all
    /// rejected here with [`PoolError::Configuration`].
    pub(crate) fn resolve(&self) -> Result<ResolvedConfig> {
        let mut flags = self.clone();

        for (name, &value) in &self.features {
            match name.as_str() {
                features::COALESCING => flags.coalescing = value,
                features::DTD_VALIDATING => flags.dtd_validating = value,
                features::EXPAND_ENTITY_REFERENCES => flags.expand_entity_references = value,
                features::IGNORE_COMMENTS => flags.ignore_comments = value,
                features::IGNORE_ELEMENT_CONTENT_WHITESPACE => {
                    flags.ignore_element_content_whitespace = value
                }
                features::NAMESPACE_AWARE => flags.namespace_aware = value,
                features::XINCLUDE_AWARE => flags.xinclude_aware = value,
                unknown => {
                    return Err(PoolError::Configuration {
                        details: format!("unknown feature \"{unknown}\""),
                    });
                }
            }
        }

        let mut schema = self.schema.clone();

        for (key, value) in &self.attributes {
            match key.as_str() {
                attributes::SCHEMA_LANGUAGE => {
                    if value != XML_SCHEMA_LANGUAGE_URI {
                        return Err(PoolError::Configuration {
                            details: format!("unsupported schema language \"{value}\""),
                        });
                    }
                }
                attributes::SCHEMA_SOURCE => {
                    if schema.is_some() {
                        return Err(PoolError::Configuration {
                            details: "both a compiled schema and a schema-source attribute \
                                      are set"
                                .to_string(),
                        });
                    }
                    let source = std::fs::read(value).map_err(|e| PoolError::Configuration {
                        details: format!("cannot read schema source \"{value}\": {e}"),
                    })?;
                    schema =
                        Some(
                            Schema::parse(&source).map_err(|e| PoolError::Configuration {
                                details: format!("schema source \"{value}\" rejected: {e}"),
                            })?,
                        );
                }
                unknown => {
                    return Err(PoolError::Configuration {
                        details: format!("unknown attribute \"{unknown}\""),
                    });
                }
            }
        }

        // Schema-validated parsing requires namespace processing, regardless
        // of how the flag or feature was last set.
        if schema.is_some() {
            flags.namespace_aware = true;
        }

        let mut options = XML_PARSE_NONET;
        if flags.expand_entity_references {
            options |= XML_PARSE_NOENT;
        }
        if flags.coalescing {
            options |= XML_PARSE_NOCDATA;
        }
        if flags.dtd_validating {
            options |= XML_PARSE_DTDVALID | XML_PARSE_DTDLOAD;
        }
        if flags.ignore_element_content_whitespace {
            options |= XML_PARSE_NOBLANKS;
        }
        if flags.namespace_aware {
            options |= XML_PARSE_NSCLEAN;
        }
        if flags.xinclude_aware {
            options |= XML_PARSE_XINCLUDE;
        }

        Ok(ResolvedConfig {
            options,
            dtd_validating: flags.dtd_validating,
            ignore_comments: flags.ignore_comments,
            xinclude_aware: flags.xinclude_aware,
            schema,
            entity_resolver: self.entity_resolver.clone(),
            error_handler: Arc::clone(&self.error_handler),
        })
    }
}

/// Immutable post-initialization snapshot. One `Arc<ResolvedConfig>` is shared
/// by the pool and every builder it constructs; nothing here mutates after
/// `initialize()`.
#[derive(Debug)]
pub(crate) struct ResolvedConfig {
    /// Computed libxml2 parser option mask.
    pub(crate) options: c_int,
    pub(crate) dtd_validating: bool,
    pub(crate) ignore_comments: bool,
    pub(crate) xinclude_aware: bool,
    pub(crate) schema: Option<Schema>,
    pub(crate) entity_resolver: Option<Arc<dyn EntityResolver>>,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
}
