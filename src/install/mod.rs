//! Step controller of the installer.
//!
//! Each invocation runs exactly one step and answers with a [`Directive`]: either re-invoke with
//! new parameters, or show a status. Looping across steps is the caller's job.

pub(crate) mod chunk;
pub(crate) mod context;
pub(crate) mod logic;
pub(crate) mod resume;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

use crate::errors::AppError;

pub use context::InstallContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Step {
    #[default]
    #[serde(rename = "check")]
    Check,
    #[serde(rename = "configuration")]
    Configure,
    #[serde(rename = "extract")]
    Extract,
    #[serde(rename = "files")]
    CopyFiles,
    #[serde(rename = "tables")]
    RestoreTables,
    #[serde(rename = "finalize")]
    Finalize,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "cleanup")]
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Verify,
    Configure,
    Deploy,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::Check,
        Step::Configure,
        Step::Extract,
        Step::CopyFiles,
        Step::RestoreTables,
        Step::Finalize,
        Step::Done,
        Step::Cleanup,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Step::Check => "check",
            Step::Configure => "configuration",
            Step::Extract => "extract",
            Step::CopyFiles => "files",
            Step::RestoreTables => "tables",
            Step::Finalize => "finalize",
            Step::Done => "done",
            Step::Cleanup => "cleanup",
        }
    }

    /// Unknown or missing identifiers start over at `Check`.
    pub fn parse(id: Option<&str>) -> Step {
        let Some(id) = id.map(str::trim) else {
            return Step::Check;
        };
        Step::ALL
            .into_iter()
            .find(|step| step.id().eq_ignore_ascii_case(id))
            .unwrap_or(Step::Check)
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Step::Check => Some(Phase::Verify),
            Step::Configure => Some(Phase::Configure),
            Step::Extract | Step::CopyFiles | Step::RestoreTables | Step::Finalize | Step::Done => {
                Some(Phase::Deploy)
            }
            Step::Cleanup => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Database/site values submitted on the Configure step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideInput {
    pub host: Option<String>,
    pub port: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub table_prefix: Option<String>,
    pub site_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StepRequest {
    pub step: Step,
    pub chunk: usize,
    /// Stop on the check page even when every check passes.
    pub preview: bool,
    pub overrides: Option<OverrideInput>,
}

impl StepRequest {
    pub fn new(step: Step, chunk: usize) -> Self {
        StepRequest {
            step,
            chunk,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    pub percentage: u8,
    pub action: String,
}

impl ProgressReport {
    pub fn new(percentage: u8, action: &str) -> Self {
        ProgressReport {
            percentage: percentage.min(100),
            action: action.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub step: Step,
    pub phase: Option<Phase>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Step>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl StatusReport {
    pub fn new(step: Step, ok: bool) -> Self {
        StatusReport {
            step,
            phase: step.phase(),
            ok,
            progress: None,
            reason: None,
            hint: None,
            next: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn failed(step: Step, err: &AppError) -> Self {
        StatusReport {
            reason: Some(err.to_string()),
            hint: Some(err.hint().to_string()),
            next: Some(Step::Cleanup),
            ..Self::new(step, false)
        }
    }

    pub fn with_progress(mut self, progress: ProgressReport) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_next(mut self, next: Step) -> Self {
        self.next = Some(next);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum Directive {
    /// Invoke again with these parameters.
    Reintake {
        step: Step,
        chunk: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<ProgressReport>,
    },
    /// Show this status; nothing runs until the operator acts.
    RenderStatus(StatusReport),
}

impl Directive {
    pub fn advance(step: Step) -> Self {
        Directive::Reintake {
            step,
            chunk: 0,
            progress: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            Directive::Reintake { .. } => true,
            Directive::RenderStatus(report) => report.ok,
        }
    }
}

/// Runs the handler for `request.step` once. Handler errors become a failed status.
pub async fn route(request: &StepRequest, ctx: &mut InstallContext) -> Directive {
    let step = request.step;
    info!("Running step {} (chunk {})", step, request.chunk);

    let outcome = match step {
        Step::Check => logic::check(request, ctx).await,
        Step::Configure => logic::configure(request, ctx).await,
        Step::Extract => logic::extract(request, ctx).await,
        Step::CopyFiles => logic::copy_files(request, ctx).await,
        Step::RestoreTables => logic::restore_tables(request, ctx).await,
        Step::Finalize => logic::finalize(request, ctx).await,
        Step::Done => logic::done(request, ctx).await,
        Step::Cleanup => logic::cleanup(request, ctx).await,
    };

    match outcome {
        Ok(directive) => directive,
        Err(err) => {
            error!("Step {} failed: {}", step, err);
            Directive::RenderStatus(StatusReport::failed(step, &err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_parse_defaults_to_check() {
        assert_eq!(Step::parse(None), Step::Check);
        assert_eq!(Step::parse(Some("bogus")), Step::Check);
        assert_eq!(Step::parse(Some("files")), Step::CopyFiles);
        assert_eq!(Step::parse(Some(" TABLES ")), Step::RestoreTables);
        for step in Step::ALL {
            assert_eq!(Step::parse(Some(step.id())), step);
        }
    }

    #[test]
    fn test_phases() {
        assert_eq!(Step::Check.phase(), Some(Phase::Verify));
        assert_eq!(Step::Configure.phase(), Some(Phase::Configure));
        assert_eq!(Step::RestoreTables.phase(), Some(Phase::Deploy));
        assert_eq!(Step::Done.phase(), Some(Phase::Deploy));
        assert_eq!(Step::Cleanup.phase(), None);
    }

    #[test]
    fn test_directive_json_shape() -> anyhow::Result<()> {
        let reintake = Directive::Reintake {
            step: Step::CopyFiles,
            chunk: 2,
            progress: Some(ProgressReport::new(23, "Copying files")),
        };
        let json = serde_json::to_value(&reintake)?;
        assert_eq!(json["directive"], "reintake");
        assert_eq!(json["step"], "files");
        assert_eq!(json["progress"]["percentage"], 23);

        let failed = Directive::RenderStatus(StatusReport::failed(
            Step::Extract,
            &AppError::ExtractionFailed("broken".to_string()),
        ));
        let json = serde_json::to_value(&failed)?;
        assert_eq!(json["directive"], "render_status");
        assert_eq!(json["ok"], false);
        assert_eq!(json["reason"], "Extraction failed: broken");
        assert_eq!(json["next"], "cleanup");
        assert!(json.get("details").is_none());
        Ok(())
    }
}
