//! Stage handlers, one per [`StageKind`].

mod generate;
mod quality_gate;
mod render;

use scriptline_config::StageKind;

use crate::context::StageContext;
use crate::error::StageError;

pub(crate) async fn execute(ctx: &mut StageContext<'_>) -> Result<(), StageError> {
    match ctx.stage.kind {
        StageKind::Generate => generate::run(ctx).await,
        StageKind::QualityGate => quality_gate::run(ctx).await,
        StageKind::Render => render::run(ctx),
    }
}
