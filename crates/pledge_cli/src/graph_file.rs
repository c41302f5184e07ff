//! JSON graph descriptions run by the CLI.
//!
//! Nodes are listed in dependency order; an input must name a node defined
//! earlier in the file, which keeps every description acyclic.

use indexmap::IndexMap;
use pledge_core::{Capabilities, PromiseError};
use pledge_runtime::{Engine, EngineConfig, NodeOptions, Promise};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Promise type of CLI graphs
pub type GraphPromise = Promise<i64, String>;

/// Engine type of CLI graphs
pub type GraphEngine = Engine<i64, String>;

/// Errors loading or building a graph description
#[derive(Debug, thiserror::Error)]
pub enum GraphFileError {
    /// The file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not a valid description
    #[error("invalid graph description: {0}")]
    Parse(#[from] serde_json::Error),

    /// A node names an input that is not defined before it
    #[error("node '{node}' uses '{input}', which is not defined before it")]
    UnknownInput {
        /// Node with the bad input
        node: String,
        /// Missing input
        input: String,
    },

    /// A settle step names a node that does not exist
    #[error("settle step {index} names unknown node '{node}'")]
    UnknownSettleTarget {
        /// Position in the settle list
        index: usize,
        /// Missing node
        node: String,
    },

    /// The engine refused to build a node
    #[error("cannot build node '{node}': {source}")]
    Engine {
        /// Node being built
        node: String,
        /// Engine error
        source: PromiseError,
    },
}

/// Computation of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeSpec {
    /// Already resolved
    Value {
        /// The value
        value: i64,
    },
    /// Already rejected
    Fail {
        /// The error
        error: String,
    },
    /// Settled by a settle step
    Manual {
        /// Declared capabilities
        #[serde(default)]
        capabilities: Capabilities,
    },
    /// Sum of every input
    Sum {
        /// Input nodes
        inputs: Vec<String>,
    },
    /// Product of every input
    Product {
        /// Input nodes
        inputs: Vec<String>,
    },
    /// First input to resolve or reject
    Race {
        /// Input nodes
        inputs: Vec<String>,
    },
    /// Input value, or a fallback if it rejects
    Recover {
        /// Input node
        input: String,
        /// Fallback value
        value: i64,
    },
}

impl NodeSpec {
    fn inputs(&self) -> Vec<&str> {
        match self {
            Self::Value { .. } | Self::Fail { .. } | Self::Manual { .. } => Vec::new(),
            Self::Sum { inputs } | Self::Product { inputs } | Self::Race { inputs } => {
                inputs.iter().map(String::as_str).collect()
            }
            Self::Recover { input, .. } => vec![input.as_str()],
        }
    }
}

/// External settlement applied after the graph is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SettleStep {
    /// Resolve a node
    Resolve {
        /// Target node
        node: String,
        /// Value
        value: i64,
    },
    /// Reject a node
    Reject {
        /// Target node
        node: String,
        /// Error
        error: String,
    },
    /// Cancel a node
    Cancel {
        /// Target node
        node: String,
    },
}

impl SettleStep {
    /// Target node
    #[must_use]
    pub fn node(&self) -> &str {
        match self {
            Self::Resolve { node, .. } | Self::Reject { node, .. } | Self::Cancel { node } => node,
        }
    }
}

/// Graph description file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFile {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
    /// Nodes in dependency order
    pub nodes: IndexMap<String, NodeSpec>,
    /// Settlements applied after building
    #[serde(default)]
    pub settle: Vec<SettleStep>,
}

impl GraphFile {
    /// Load and validate a description
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or validated
    pub fn load(path: &Path) -> Result<Self, GraphFileError> {
        let text = std::fs::read_to_string(path).map_err(|source| GraphFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let graph: Self = serde_json::from_str(&text)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Check that every reference resolves to an earlier node
    ///
    /// # Errors
    ///
    /// Returns the first dangling reference
    pub fn validate(&self) -> Result<(), GraphFileError> {
        for (position, (name, spec)) in self.nodes.iter().enumerate() {
            for input in spec.inputs() {
                let defined_before = self
                    .nodes
                    .get_index_of(input)
                    .is_some_and(|index| index < position);
                if !defined_before {
                    return Err(GraphFileError::UnknownInput {
                        node: name.clone(),
                        input: input.to_string(),
                    });
                }
            }
        }
        for (index, step) in self.settle.iter().enumerate() {
            if !self.nodes.contains_key(step.node()) {
                return Err(GraphFileError::UnknownSettleTarget {
                    index,
                    node: step.node().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Build every node on `engine`, in file order
    ///
    /// # Errors
    ///
    /// Returns error if a reference is dangling or the engine refuses a node
    pub fn build(&self, engine: &GraphEngine) -> Result<IndexMap<String, GraphPromise>, GraphFileError> {
        let mut built: IndexMap<String, GraphPromise> = IndexMap::with_capacity(self.nodes.len());
        for (name, spec) in &self.nodes {
            let inputs = spec
                .inputs()
                .into_iter()
                .map(|input| {
                    built.get(input).ok_or_else(|| GraphFileError::UnknownInput {
                        node: name.clone(),
                        input: input.to_string(),
                    })
                })
                .collect::<Result<Vec<&GraphPromise>, _>>()?;

            let promise = build_node(engine, name, spec, &inputs).map_err(|source| {
                GraphFileError::Engine {
                    node: name.clone(),
                    source,
                }
            })?;
            tracing::debug!(node = %name, promise = %promise.id(), "node built");
            built.insert(name.clone(), promise);
        }
        Ok(built)
    }
}

fn build_node(
    engine: &GraphEngine,
    name: &str,
    spec: &NodeSpec,
    inputs: &[&GraphPromise],
) -> Result<GraphPromise, PromiseError> {
    match spec {
        NodeSpec::Value { value } => Ok(engine.resolved(*value)),
        NodeSpec::Fail { error } => Ok(engine.rejected(error.clone())),
        NodeSpec::Manual { capabilities } => {
            Ok(engine.manual_with(*capabilities, NodeOptions::labeled(name)))
        }
        NodeSpec::Sum { .. } => engine.all(inputs, |values| {
            values
                .into_iter()
                .try_fold(0i64, i64::checked_add)
                .ok_or_else(|| "sum overflowed".to_string())
        }),
        NodeSpec::Product { .. } => engine.all(inputs, |values| {
            values
                .into_iter()
                .try_fold(1i64, i64::checked_mul)
                .ok_or_else(|| "product overflowed".to_string())
        }),
        NodeSpec::Race { .. } => engine.race(inputs),
        NodeSpec::Recover { value, .. } => {
            let fallback = *value;
            let input = inputs.first().copied().ok_or_else(|| PromiseError::InvalidGraph {
                reason: format!("recover node '{name}' has no input"),
            })?;
            engine.catch(input, move |_| Ok(fallback))
        }
    }
}

/// Apply one settle step
///
/// # Errors
///
/// Returns the engine's refusal, e.g. `AlreadySettled`
pub fn apply(step: &SettleStep, promise: &GraphPromise) -> Result<(), PromiseError> {
    match step {
        SettleStep::Resolve { value, .. } => promise.resolve(*value),
        SettleStep::Reject { error, .. } => promise.reject(error.clone()),
        SettleStep::Cancel { .. } => promise.cancel(),
    }
}
