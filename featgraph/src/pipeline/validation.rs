//! Fragment validation and scope propagation.

use super::Fragment;
use crate::errors::PipelineBuildError;
use crate::graph::NodeId;
use crate::processors::{NodeKind, Scope};

impl Fragment {
    /// Validates the fragment and prepares it for absorption.
    ///
    /// - features in input position become feature references
    /// - inputs must be inputs or features, outputs must be features, and
    ///   neither may appear anywhere else
    /// - every step receives a number of parents its arity accepts
    /// - dataset-wide values (dataset inputs, aggregators) propagate to
    ///   their descendants; merging one with a per-sample branch is only
    ///   allowed at an aggregator
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn check(mut self) -> Result<Self, PipelineBuildError> {
        self.normalize_inputs()?;
        self.check_positions()?;
        self.check_arities()?;
        self.propagate_scopes()?;
        Ok(self)
    }

    fn normalize_inputs(&mut self) -> Result<(), PipelineBuildError> {
        for id in self.inputs.clone() {
            let node = self.node_mut(id)?;
            match node.kind() {
                NodeKind::Input => {}
                NodeKind::Feature => node.make_feature_reference(),
                _ => {
                    return Err(PipelineBuildError::malformed(
                        node.label(),
                        "a pipeline must start with inputs or features",
                    ))
                }
            }
        }
        Ok(())
    }

    fn check_positions(&self) -> Result<(), PipelineBuildError> {
        for id in &self.outputs {
            let node = self.node_ref(*id)?;
            if node.kind() != NodeKind::Feature {
                return Err(PipelineBuildError::malformed(
                    node.label(),
                    "a pipeline must end with features",
                ));
            }
        }
        for (id, node) in self.arena.iter() {
            let boundary = self.inputs.contains(&id) || self.outputs.contains(&id);
            if !boundary && matches!(node.kind(), NodeKind::Input | NodeKind::Feature) {
                return Err(PipelineBuildError::malformed(
                    node.label(),
                    "inputs and features cannot appear inside a pipeline",
                ));
            }
        }
        Ok(())
    }

    fn check_arities(&self) -> Result<(), PipelineBuildError> {
        for (_, node) in self.arena.iter() {
            let arity = node.arity();
            if !arity.accepts(node.parents().len()) {
                return Err(PipelineBuildError::arity(
                    node.label(),
                    arity.to_string(),
                    node.parents().len(),
                ));
            }
        }
        Ok(())
    }

    fn propagate_scopes(&mut self) -> Result<(), PipelineBuildError> {
        self.arena
            .compute_depths()
            .map_err(|err| PipelineBuildError::new(err.to_string()))?;

        for id in self.arena.topological_order() {
            let node = self.node_ref(id)?;
            let parent_scopes: Vec<bool> = node
                .parents()
                .iter()
                .filter_map(|p| self.arena.get(*p))
                .map(|p| p.is_dataset_wide())
                .collect();
            let any_wide = parent_scopes.iter().any(|wide| *wide);
            let all_wide = !parent_scopes.is_empty() && parent_scopes.iter().all(|wide| *wide);

            let dataset_wide = match node.kind() {
                NodeKind::Root => false,
                NodeKind::Input => node
                    .input_spec()
                    .is_some_and(|spec| spec.scope == Scope::Dataset),
                NodeKind::Aggregator => true,
                NodeKind::Feature => {
                    let declared = node
                        .feature_spec()
                        .is_some_and(|spec| spec.scope == Scope::Dataset);
                    if declared != any_wide {
                        let reason = if declared {
                            "a dataset-wide feature must receive a dataset-wide value"
                        } else {
                            "a per-sample feature cannot receive a dataset-wide value"
                        };
                        return Err(PipelineBuildError::malformed(node.label(), reason));
                    }
                    declared
                }
                NodeKind::SampleProcessor | NodeKind::BatchProcessor => {
                    if any_wide && !all_wide {
                        return Err(PipelineBuildError::scope_mix(node.label()));
                    }
                    all_wide
                }
            };
            self.node_mut(id)?.set_dataset_wide(dataset_wide);
        }
        Ok(())
    }

    fn node_ref(&self, id: NodeId) -> Result<&crate::graph::GraphNode, PipelineBuildError> {
        self.arena
            .get(id)
            .ok_or_else(|| PipelineBuildError::new(format!("unknown fragment node {id}")))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut crate::graph::GraphNode, PipelineBuildError> {
        self.arena
            .get_mut(id)
            .ok_or_else(|| PipelineBuildError::new(format!("unknown fragment node {id}")))
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::codes;
    use crate::processors::{
        ds_feat, ds_input, feat, input, FnAggregator, FnProcessor, NodeKind, Processor,
    };
    use serde_json::json;

    fn double() -> FnProcessor {
        FnProcessor::unary("double", |x| Ok(json!(x.as_i64().unwrap_or(0) * 2)))
    }

    fn add() -> FnProcessor {
        FnProcessor::binary("add", |a, b| {
            Ok(json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)))
        })
    }

    fn sum() -> Processor {
        Processor::aggregator(FnAggregator::new("sum", |values| {
            Ok(json!(values.iter().filter_map(|v| v.as_i64()).sum::<i64>()))
        }))
    }

    #[test]
    fn test_feature_in_input_position_becomes_reference() {
        let fragment = feat("x")
            .then(double())
            .unwrap()
            .then(feat("y"))
            .unwrap()
            .check()
            .unwrap();

        let first = fragment.node(fragment.inputs()[0]).unwrap();
        assert_eq!(first.kind(), NodeKind::Input);
        assert!(first.input_spec().unwrap().required_feature);
        assert_eq!(first.label(), "Input(x)");
    }

    #[test]
    fn test_output_must_be_feature() {
        let err = input("a").then(double()).unwrap().check().unwrap_err();
        assert_eq!(err.code(), Some(codes::MALFORMED));
    }

    #[test]
    fn test_processor_cannot_start_pipeline() {
        let err = crate::pipeline::Fragment::from(double())
            .then(feat("x"))
            .unwrap()
            .check()
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::MALFORMED));
    }

    #[test]
    fn test_inner_feature_rejected() {
        let err = input("a")
            .then(feat("x"))
            .unwrap()
            .then(double())
            .unwrap()
            .then(feat("y"))
            .unwrap()
            .check()
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::MALFORMED));
    }

    #[test]
    fn test_arity_checked_on_positional_connection() {
        let err = input("a")
            .then(add())
            .unwrap()
            .then(feat("x"))
            .unwrap()
            .check()
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::ARITY));
    }

    #[test]
    fn test_aggregate_propagates_dataset_scope() {
        let fragment = input("a")
            .then(sum())
            .unwrap()
            .then(double())
            .unwrap()
            .then(ds_feat("total"))
            .unwrap()
            .check()
            .unwrap();

        let wide: Vec<(NodeKind, bool)> = fragment
            .nodes()
            .map(|(_, n)| (n.kind(), n.is_dataset_wide()))
            .collect();
        assert_eq!(
            wide,
            vec![
                (NodeKind::Input, false),
                (NodeKind::Aggregator, true),
                (NodeKind::SampleProcessor, true),
                (NodeKind::Feature, true),
            ]
        );
    }

    #[test]
    fn test_mixed_scope_merge_rejected() {
        let err = input("a")
            .also(ds_input("scale"))
            .then(add())
            .unwrap()
            .then(feat("scaled"))
            .unwrap()
            .check()
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::SCOPE_MIX));
    }

    #[test]
    fn test_mixed_scope_allowed_at_aggregator() {
        let fragment = input("a")
            .also(ds_input("scale"))
            .then(sum())
            .unwrap()
            .then(ds_feat("total"))
            .unwrap()
            .check();
        assert!(fragment.is_ok());
    }

    #[test]
    fn test_feature_scope_must_match() {
        let err = input("a")
            .then(sum())
            .unwrap()
            .then(feat("total"))
            .unwrap()
            .check()
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::MALFORMED));

        let err = input("a").then(ds_feat("a2")).unwrap().check().unwrap_err();
        assert_eq!(err.code(), Some(codes::MALFORMED));
    }
}
