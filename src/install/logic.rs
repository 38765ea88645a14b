// snapshotinstaller/src/install/logic.rs
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use super::chunk::{self, ChunkApply, ChunkWindow, FILES_BAND, TABLES_BAND};
use super::resume::{self, ExtractionState};
use super::{Directive, InstallContext, OverrideInput, ProgressReport, StatusReport, Step, StepRequest};
use crate::database::{Database, QueryLog};
use crate::errors::{AppError, Result};
use crate::fs::SiteFs;
use crate::restore;
use crate::session::{OverrideKey, OverrideStore};
use crate::sitecfg::htaccess::REWRITE_BASE;
use crate::sitecfg::wpconfig::TABLE_PREFIX_KEY;
use crate::sitecfg::{ConfigFile, Htaccess, Manifest, WpConfig};

const PEEK_ENTRIES: [&str; 2] = ["www/wp-config.php", Manifest::FILE_NAME];

#[derive(Debug, Serialize)]
struct CheckItem {
    name: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl CheckItem {
    fn new(name: &'static str, ok: bool, value: Option<String>) -> Self {
        CheckItem { name, ok, value }
    }
}

pub async fn check(request: &StepRequest, ctx: &mut InstallContext) -> Result<Directive> {
    let archive = ctx.archive.as_ref();
    let archive_valid = match archive {
        Some(archive) => archive.validate(),
        None => Err("No snapshot archive found".to_string()),
    };
    let temp_root = probe_writable(&ctx.config.temp_root);
    let target = usable_target(ctx.target.root());

    let checks = vec![
        CheckItem::new(
            "Archive",
            archive.is_some_and(|a| a.exists()),
            archive.map(|a| a.path().display().to_string()),
        ),
        CheckItem::new("ArchiveValid", archive_valid.is_ok(), archive_valid.err()),
        CheckItem::new(
            "TempWritable",
            temp_root.is_ok(),
            Some(temp_root.err().unwrap_or_else(|| ctx.config.temp_root.display().to_string())),
        ),
        CheckItem::new("TargetUsable", target, Some(ctx.target.root().display().to_string())),
    ];

    let all_good = checks.iter().all(|c| c.ok);
    if all_good && !request.preview {
        return Ok(Directive::advance(Step::Configure));
    }
    for failed in checks.iter().filter(|c| !c.ok) {
        warn!("Check {} failed: {:?}", failed.name, failed.value);
    }

    let mut report = StatusReport::new(Step::Check, all_good).with_details(json!({ "checks": checks }));
    if all_good {
        report = report.with_next(Step::Configure);
    } else {
        report.reason = Some("Some requirements are not met".to_string());
    }
    Ok(Directive::RenderStatus(report))
}

fn probe_writable(dir: &Path) -> std::result::Result<(), String> {
    let probe = (|| -> anyhow::Result<()> {
        SiteFs::ensure(dir)?;
        let file = dir.join(".si_probe");
        fs::write(&file, b"probe")?;
        fs::remove_file(&file)?;
        Ok(())
    })();
    probe.map_err(|e| format!("{} is not writable: {:#}", dir.display(), e))
}

fn usable_target(dir: &Path) -> bool {
    if dir.is_dir() {
        return true;
    }
    !dir.exists() && dir.parent().is_some_and(Path::is_dir)
}

pub async fn configure(request: &StepRequest, ctx: &mut InstallContext) -> Result<Directive> {
    if let Some(input) = &request.overrides {
        apply_override_input(&mut ctx.overrides, input);
        return Ok(Directive::advance(Step::Configure));
    }

    let archive = ctx.archive()?.clone();
    SiteFs::ensure(ctx.temp.root())?;
    archive
        .extract_named(ctx.temp.root(), &PEEK_ENTRIES)
        .map_err(|e| AppError::ExtractionFailed(format!("{:#}", e)))?;

    let manifest = Manifest::load(&ctx.temp)?;
    let config = ctx.source_wp_config()?;
    let config_status = config.is_complete();

    let mut database_status = false;
    let mut connection_error = None;
    let mut db_empty = false;
    if config_status {
        match ctx.connect(&config).await {
            Ok(_) => {
                database_status = true;
                db_empty = ctx.database.is_schema_empty().await;
            }
            Err(e) => connection_error = Some(e),
        }
    }

    let settings = ctx.connection_settings(&config);
    let (errno, error_class) = match &connection_error {
        Some(AppError::ConnectionFailed { code, class, .. }) => (*code, Some(*class)),
        _ => (None, None),
    };
    let details = json!({
        "manifest_status": true,
        "snapshot_version": manifest.version(),
        "deployment_directory": ctx.target.root(),
        "site_url": ctx.target_url(),
        "can_override": ctx.overrides.can_override(),
        "has_overrides": ctx.overrides.has_overrides(),
        "config_status": config_status,
        "has_config_file": config.has_file(),
        "database_status": database_status,
        "db_connection_errno": errno,
        "db_connection_error": error_class,
        "db_empty": db_empty,
        "database": settings,
    });

    let mut report = StatusReport::new(Step::Configure, config_status && database_status)
        .with_details(details)
        .with_next(Step::Extract);
    let failure = if !config_status {
        Some(AppError::ConfigMissing(
            "www/wp-config.php is missing or incomplete".to_string(),
        ))
    } else {
        connection_error
    };
    if let Some(err) = failure {
        report.reason = Some(err.to_string());
        report.hint = Some(err.hint().to_string());
    }
    Ok(Directive::RenderStatus(report))
}

/// Stores submitted values; blank fields drop earlier overrides.
fn apply_override_input(overrides: &mut OverrideStore, input: &OverrideInput) {
    fn filled(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
    let mut store = |key: OverrideKey, value: Option<&str>| match value {
        Some(value) => overrides.set(key, value),
        None => overrides.drop(key),
    };

    store(OverrideKey::DbName, filled(&input.name));
    store(OverrideKey::DbUser, filled(&input.user));
    store(OverrideKey::DbPassword, input.password.as_deref().filter(|v| !v.is_empty()));
    store(OverrideKey::DbTablePrefix, filled(&input.table_prefix));
    store(OverrideKey::TargetUrl, filled(&input.site_url));

    let host = filled(&input.host).map(|host| match filled(&input.port) {
        Some(port) if port.parse::<u16>().is_ok() => format!("{}:{}", host, port),
        _ => host.to_string(),
    });
    store(OverrideKey::DbHost, host.as_deref());
    debug!("Override input applied");
}

pub async fn extract(_request: &StepRequest, ctx: &mut InstallContext) -> Result<Directive> {
    let mut state = resume::inspect(&ctx.temp)?;
    if state == ExtractionState::Partial {
        state = resume::repair(&ctx.temp)?;
    }
    if state == ExtractionState::Complete {
        info!("Package already extracted in {}", ctx.temp.root().display());
        return Ok(Directive::advance(Step::CopyFiles));
    }

    let archive = ctx.archive()?;
    archive
        .extract_all(ctx.temp.root())
        .map_err(|e| AppError::ExtractionFailed(format!("{:#}", e)))?;

    // Fewer entries would read as a partial tree next time and be extracted forever.
    let entries = ctx.temp.ls_top()?.len();
    if entries < 3 {
        return Err(AppError::ExtractionFailed(format!(
            "Package holds only {} top-level entries",
            entries
        )));
    }
    Ok(Directive::Reintake {
        step: Step::Extract,
        chunk: 0,
        progress: Some(ProgressReport::new(5, "Extracting package")),
    })
}

struct FileCopier<'a> {
    source: &'a SiteFs,
    target: &'a SiteFs,
}

#[async_trait(?Send)]
impl ChunkApply<PathBuf> for FileCopier<'_> {
    async fn apply(&mut self, item: &PathBuf) -> Result<()> {
        self.target
            .copy_from(self.source, item)
            .map_err(|e| AppError::CopyFailed(format!("{:#}", e)))
    }
}

pub async fn copy_files(request: &StepRequest, ctx: &mut InstallContext) -> Result<Directive> {
    let source = ctx.temp.chroot("www").ok_or_else(|| {
        AppError::ExtractionFailed("Extracted package has no www directory".to_string())
    })?;
    let target = SiteFs::ensure(ctx.target.root())?;

    let files = source.list_recursive()?;
    let window = ChunkWindow::new(request.chunk, ctx.file_chunk_size);
    let mut copier = FileCopier {
        source: &source,
        target: &target,
    };
    let outcome = chunk::run_chunk(&files, window, &mut copier).await;
    let progress = FILES_BAND.report(
        outcome.processed_count(window),
        files.len(),
        request.chunk,
        "Copying files",
    );

    if !outcome.status {
        let err = outcome
            .failure
            .unwrap_or_else(|| AppError::CopyFailed("no files found in package".to_string()));
        return Ok(Directive::RenderStatus(
            StatusReport::failed(Step::CopyFiles, &err).with_progress(progress),
        ));
    }

    info!(
        "Copied {} files (chunk {}, {} total)",
        outcome.processed.len(),
        request.chunk,
        files.len()
    );
    Ok(if outcome.is_final {
        Directive::Reintake {
            step: Step::RestoreTables,
            chunk: 0,
            progress: Some(progress),
        }
    } else {
        Directive::Reintake {
            step: Step::CopyFiles,
            chunk: request.chunk + 1,
            progress: Some(progress),
        }
    })
}

struct TableRestorer<'a> {
    db: &'a mut dyn Database,
    log: &'a QueryLog,
    source_prefix: String,
    target_prefix: String,
}

#[async_trait(?Send)]
impl ChunkApply<PathBuf> for TableRestorer<'_> {
    async fn apply(&mut self, dump: &PathBuf) -> Result<()> {
        let result = restore::restore_table(
            dump,
            &self.source_prefix,
            &self.target_prefix,
            &mut *self.db,
            self.log,
        )
        .await?;
        if result.overall_status {
            return Ok(());
        }
        Err(AppError::StatementFailed {
            table: result.table.clone(),
            path: dump.display().to_string(),
            error: result.last_error().unwrap_or("unknown error").to_string(),
        })
    }
}

pub async fn restore_tables(request: &StepRequest, ctx: &mut InstallContext) -> Result<Directive> {
    let dumps = restore::list_dumps(&ctx.temp);
    let config = ctx.source_wp_config()?;
    let settings = ctx.connect(&config).await?;

    let window = ChunkWindow::new(request.chunk, ctx.table_chunk_size);
    let mut restorer = TableRestorer {
        db: ctx.database.as_mut(),
        log: &ctx.query_log,
        source_prefix: config.table_prefix().to_string(),
        target_prefix: settings.table_prefix,
    };
    let outcome = chunk::run_chunk(&dumps, window, &mut restorer).await;
    let progress = TABLES_BAND.report(
        outcome.processed_count(window),
        dumps.len(),
        request.chunk,
        "Restoring tables",
    );

    if !outcome.status {
        let err = outcome
            .failure
            .unwrap_or_else(|| AppError::MalformedDump("Unable to determine table".to_string()));
        return Ok(Directive::RenderStatus(
            StatusReport::failed(Step::RestoreTables, &err).with_progress(progress),
        ));
    }

    Ok(if outcome.is_final {
        Directive::Reintake {
            step: Step::Finalize,
            chunk: 0,
            progress: Some(progress),
        }
    } else {
        Directive::Reintake {
            step: Step::RestoreTables,
            chunk: request.chunk + 1,
            progress: Some(progress),
        }
    })
}

pub async fn finalize(_request: &StepRequest, ctx: &mut InstallContext) -> Result<Directive> {
    let site_url = ctx.target_url();
    if ctx.overrides.can_override() {
        update_htaccess(&ctx.target, &site_url)?;
        update_wp_config(&ctx.target, &ctx.overrides)?;
    }
    update_site_options(ctx, &site_url).await?;

    Ok(Directive::Reintake {
        step: Step::Done,
        chunk: 0,
        progress: Some(ProgressReport::new(95, "Finalizing installation")),
    })
}

fn update_htaccess(target: &SiteFs, site_url: &str) -> Result<()> {
    let mut htaccess = Htaccess::load(target)?;
    if !htaccess.has_file() {
        return Ok(());
    }
    let url = Url::parse(site_url)?;
    let site_path = format!("{}/", url.path().trim_end_matches('/'));
    if htaccess.get(REWRITE_BASE) == Some(site_path.as_str()) {
        return Ok(());
    }
    if htaccess.update_raw_base(&site_path) {
        info!("Rewrite base set to {}", site_path);
        htaccess.write()?;
    }
    Ok(())
}

fn update_wp_config(target: &SiteFs, overrides: &OverrideStore) -> Result<()> {
    let mut config = WpConfig::load(target)?;
    if !config.has_file() {
        warn!("No wp-config.php in {}", target.root().display());
        return Ok(());
    }
    let fields = [
        (OverrideKey::DbHost, "DB_HOST"),
        (OverrideKey::DbUser, "DB_USER"),
        (OverrideKey::DbPassword, "DB_PASSWORD"),
        (OverrideKey::DbName, "DB_NAME"),
        (OverrideKey::DbTablePrefix, TABLE_PREFIX_KEY),
    ];
    let mut changed = false;
    for (key, config_key) in fields {
        let Some(value) = overrides.get(key) else {
            continue;
        };
        if config.get(config_key) != Some(value) {
            changed |= config.update_raw(config_key, value);
        }
    }
    if changed {
        info!("Writing overridden settings to wp-config.php");
        config.write()?;
    }
    Ok(())
}

async fn update_site_options(ctx: &mut InstallContext, site_url: &str) -> Result<()> {
    let config = WpConfig::load(&ctx.target)?;
    let settings = ctx.connect(&config).await?;
    let pfx = settings.table_prefix;
    let url = sql_quote(site_url);

    let statements = [
        format!("UPDATE {pfx}options SET option_value='{url}' WHERE option_name='siteurl' LIMIT 1"),
        format!("UPDATE {pfx}options SET option_value='{url}' WHERE option_name='home' LIMIT 1"),
        format!("DELETE FROM {pfx}options WHERE option_name='snapshot_running_backup'"),
        format!("DELETE FROM {pfx}options WHERE option_name='snapshot_running_backup_status'"),
        format!("DELETE FROM {pfx}sitemeta WHERE meta_key='snapshot_running_backup'"),
        format!("DELETE FROM {pfx}sitemeta WHERE meta_key='snapshot_running_backup_status'"),
    ];
    for statement in &statements {
        if !ctx.database.query(statement).await {
            ctx.query_log
                .statement_failed(statement, &ctx.database.last_error());
        }
    }
    Ok(())
}

fn sql_quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "''")
}

pub async fn done(_request: &StepRequest, ctx: &mut InstallContext) -> Result<Directive> {
    let report = StatusReport::new(Step::Done, true)
        .with_next(Step::Cleanup)
        .with_details(json!({ "view_url": ctx.target_url() }));
    Ok(Directive::RenderStatus(report))
}

pub async fn cleanup(_request: &StepRequest, ctx: &mut InstallContext) -> Result<Directive> {
    let temp_status = ctx.temp.root().exists() && outcome("temp tree", ctx.temp.remove_tree());
    if temp_status {
        ctx.overrides.drop(OverrideKey::TempDir);
    }

    let archive_path = ctx.archive.as_ref().map(|a| a.path().to_path_buf());
    let source_status = match archive_path.as_deref().and_then(|p| ctx.target.relative(p)) {
        Some(relative) => outcome("archive", ctx.target.remove_file(&relative)),
        None => true,
    };

    let log_status = match ctx.query_log.path().filter(|p| p.exists()) {
        Some(path) => outcome(
            "query log",
            fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display())),
        ),
        None => true,
    };

    let report = StatusReport::new(Step::Cleanup, temp_status && source_status)
        .with_details(json!({
            "temp_status": temp_status,
            "temp_path": ctx.temp.root(),
            "source_status": source_status,
            "source_path": archive_path,
            "log_status": log_status,
            "view_url": ctx.target_url(),
        }));
    Ok(Directive::RenderStatus(report))
}

fn outcome(what: &str, result: anyhow::Result<()>) -> bool {
    match result {
        Ok(()) => {
            info!("Removed {}", what);
            true
        }
        Err(e) => {
            warn!("Unable to remove {}: {:#}", what, e);
            false
        }
    }
}
