//! Tera rendering engine: [`UnitKind`] and [`Renderer`].
//!
//! | Kind    | File name               |
//! |---------|-------------------------|
//! | Service | `<project>-sync.service`|
//! | Timer   | `<project>-sync.timer`  |

use tera::{Context, Tera};

use crate::context::UnitContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("systemd/service.tera", include_str!("templates/service.tera")),
    ("systemd/timer.tera", include_str!("templates/timer.tera")),
];

/// The two units installed per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Service,
    Timer,
}

impl UnitKind {
    /// Both kinds, service first.
    pub fn all() -> &'static [UnitKind] {
        &[UnitKind::Service, UnitKind::Timer]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            UnitKind::Service => "systemd/service.tera",
            UnitKind::Timer => "systemd/timer.tera",
        }
    }

    pub fn file_name(&self, ctx: &UnitContext) -> String {
        match self {
            UnitKind::Service => ctx.service_name.clone(),
            UnitKind::Timer => ctx.timer_name.clone(),
        }
    }
}

/// One rendered unit file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedUnit {
    pub kind: UnitKind,
    pub file_name: String,
    pub content: String,
}

/// Renders unit files from the embedded templates. Create once and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TPLS.iter().copied())?;
        Ok(Self { tera })
    }

    pub fn render(&self, ctx: &UnitContext, kind: UnitKind) -> Result<RenderedUnit, RenderError> {
        let tera_ctx = Context::from_serialize(ctx)?;
        let content = self.tera.render(kind.template_name(), &tera_ctx)?;
        Ok(RenderedUnit {
            kind,
            file_name: kind.file_name(ctx),
            content,
        })
    }

    /// Render the service and the timer, in that order.
    pub fn render_all(&self, ctx: &UnitContext) -> Result<Vec<RenderedUnit>, RenderError> {
        UnitKind::all()
            .iter()
            .map(|kind| self.render(ctx, *kind))
            .collect()
    }
}
