//! Probe-then-build launch specs for supervision units

use async_trait::async_trait;
use shared::camera_info;

use crate::core::pipeline::PipelineBuilder;
use crate::error::DisplayResult;
use crate::services::codec_probe::CodecProbe;
use crate::traits::PipelineFactory;
use crate::types::{PipelineSpec, UnitPlan};

/// Re-probes every source before each launch and builds its spec
#[derive(Clone)]
pub struct ProbingPipelineFactory {
    probe: CodecProbe,
    builder: PipelineBuilder,
}

impl ProbingPipelineFactory {
    pub fn new(probe: CodecProbe, builder: PipelineBuilder) -> Self {
        Self { probe, builder }
    }

    pub fn builder(&self) -> &PipelineBuilder {
        &self.builder
    }
}

#[async_trait]
impl PipelineFactory for ProbingPipelineFactory {
    async fn live_spec(&self, plan: &UnitPlan) -> DisplayResult<PipelineSpec> {
        match plan {
            UnitPlan::Source { descriptor, placement } => {
                let outcome = self.probe.decide(&descriptor.name, &descriptor.url).await;
                camera_info!(
                    descriptor.name,
                    mode = %outcome.decision,
                    fallback = outcome.fell_back,
                    "🎞️ Pipeline selected for slot {}",
                    placement.slot
                );
                Ok(self.builder.build(descriptor, placement, outcome.decision))
            }
            UnitPlan::Compositor { spec } => Ok(spec.clone()),
        }
    }

    fn placeholder_spec(&self, plan: &UnitPlan) -> Option<PipelineSpec> {
        match plan {
            UnitPlan::Source { descriptor, placement } => Some(self.builder.build_placeholder(descriptor, placement)),
            UnitPlan::Compositor { .. } => None,
        }
    }
}
