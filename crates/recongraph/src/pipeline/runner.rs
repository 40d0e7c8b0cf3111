//! Drives one scan from pending to a terminal status.

use tracing::{info_span, Instrument};

use crate::broadcast::scan_store::ScanStore;
use crate::db::recon_repo;
use crate::error::ToolError;
use crate::parsers::{ParseResult, ParserRegistry};
use crate::scan::{ActiveScanRegistry, ScanStatus};
use crate::tools::{catalog, ToolInfo, ToolRunner};

use super::context::{ScanContext, ScanType, FULL_AUTO_CHAIN};
use super::error::PipelineError;

/// How the stage sequence ended when it did not fail.
enum Flow {
    Finished,
    Halted,
}

/// Newline-terminated stdin payload, one item per line.
fn line_input<I>(items: I) -> String
where
    I: IntoIterator<Item = String>,
{
    items.into_iter().map(|item| item + "\n").collect()
}

fn chain_tool(name: &str) -> Result<&'static ToolInfo, PipelineError> {
    catalog::get(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()).into())
}

pub struct Pipeline {
    store: ScanStore,
    runner: ToolRunner,
    parsers: ParserRegistry,
    registry: ActiveScanRegistry,
}

impl Pipeline {
    pub fn new(store: ScanStore, runner: ToolRunner, registry: ActiveScanRegistry) -> Self {
        Self {
            store,
            runner,
            parsers: ParserRegistry::new(),
            registry,
        }
    }

    /// Runs the scan and returns its final status. Never returns an error:
    /// failures are recorded on the job.
    pub async fn run(&self, mut ctx: ScanContext) -> ScanStatus {
        let span = info_span!("scan.run",
            scan_id = %ctx.scan_id(),
            scan_type = %ctx.scan_type,
            target = %ctx.target,
        );
        async {
            let status = self.execute(&mut ctx).await;
            self.registry.mark_finished(ctx.scan_id());
            log::info!("Scan {} finished as {}", ctx.scan_id(), status);
            status
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, ctx: &mut ScanContext) -> ScanStatus {
        let scan = ctx.scan.clone();

        if let Err(current) = scan.transition(ScanStatus::Running) {
            // Stopped before it ever ran.
            return self.save_partial(ctx, current);
        }
        match self.store.mark_started(ctx.scan_id()) {
            Ok(true) => {}
            Ok(false) => log::warn!("Scan {} was no longer pending at start", ctx.scan_id()),
            Err(e) => log::error!("Failed to persist start of scan {}: {}", ctx.scan_id(), e),
        }
        scan.log(format!(
            "[*] Starting {} scan on {}",
            ctx.scan_type, ctx.target
        ));

        let outcome = match ctx.scan_type {
            ScanType::FullAuto => self.run_chain(ctx).await,
            ScanType::Single(tool) => self.run_single(ctx, tool).await,
        };

        match outcome {
            Ok(Flow::Finished) => self.complete(ctx).await,
            Ok(Flow::Halted) => self.save_partial(ctx, scan.status()),
            Err(e) => self.fail(ctx, &e),
        }
    }

    /// Marks the scan completed once no pause or stop is pending.
    async fn complete(&self, ctx: &ScanContext) -> ScanStatus {
        loop {
            match self.checkpoint(ctx, 100).await {
                Ok(true) => {}
                Ok(false) => return self.save_partial(ctx, ctx.scan.status()),
                Err(e) => return self.fail(ctx, &e),
            }
            match ctx.scan.transition(ScanStatus::Completed) {
                Ok(_) => {
                    ctx.scan.log("[+] Scan completed successfully!");
                    if let Err(e) =
                        self.store
                            .finish(ctx.scan_id(), ScanStatus::Completed, &ctx.summary, None)
                    {
                        log::error!("Failed to persist completion of {}: {}", ctx.scan_id(), e);
                    }
                    return ScanStatus::Completed;
                }
                // Paused between the checkpoint and the transition.
                Err(ScanStatus::Paused) => continue,
                Err(current) => return self.save_partial(ctx, current),
            }
        }
    }

    async fn run_single(
        &self,
        ctx: &mut ScanContext,
        tool: &'static ToolInfo,
    ) -> Result<Flow, PipelineError> {
        if !self.checkpoint(ctx, 10).await? {
            return Ok(Flow::Halted);
        }
        let result = self.run_stage(ctx, tool, None).await?;
        self.record(ctx, tool.name, result)?;
        Ok(Flow::Finished)
    }

    async fn run_chain(&self, ctx: &mut ScanContext) -> Result<Flow, PipelineError> {
        let [subfinder, httpx, waybackurls, nuclei] = FULL_AUTO_CHAIN;

        // Stage 1: subdomain discovery
        if !self.checkpoint(ctx, 5).await? {
            return Ok(Flow::Halted);
        }
        let subfinder = chain_tool(subfinder)?;
        let result = self.run_stage(ctx, subfinder, None).await?;
        self.record(ctx, subfinder.name, result)?;

        let subdomains = recon_repo::list_subdomains(self.store.database(), ctx.project_id())?;

        // Stage 2: HTTP probing of every known host
        if !self.checkpoint(ctx, 30).await? {
            return Ok(Flow::Halted);
        }
        if subdomains.is_empty() {
            ctx.scan.log("[!] No subdomains found, skipping httpx");
        } else {
            let httpx = chain_tool(httpx)?;
            let result = self
                .run_stage(ctx, httpx, Some(line_input(subdomains.iter().cloned())))
                .await?;
            self.record(ctx, httpx.name, result)?;
        }

        // Stage 3: historical URLs
        if !self.checkpoint(ctx, 55).await? {
            return Ok(Flow::Halted);
        }
        let waybackurls = chain_tool(waybackurls)?;
        let result = self.run_stage(ctx, waybackurls, None).await?;
        self.record(ctx, waybackurls.name, result)?;

        // Stage 4: vulnerability templates against every host
        if !self.checkpoint(ctx, 75).await? {
            return Ok(Flow::Halted);
        }
        if subdomains.is_empty() {
            ctx.scan.log("[!] No targets for nuclei, skipping");
        } else {
            let nuclei = chain_tool(nuclei)?;
            let targets = line_input(subdomains.iter().map(|host| format!("https://{}", host)));
            let result = self.run_stage(ctx, nuclei, Some(targets)).await?;
            self.record(ctx, nuclei.name, result)?;
        }

        Ok(Flow::Finished)
    }

    /// Waits out a pause, then reports whether the scan may continue. On
    /// continue the progress checkpoint is persisted.
    async fn checkpoint(&self, ctx: &ScanContext, progress: u8) -> Result<bool, PipelineError> {
        let scan = &ctx.scan;
        if scan.pause_gate().is_paused() {
            scan.log("[*] Scan paused. Waiting to resume...");
            scan.pause_gate().wait_if_paused().await;
            if scan.is_stopped() {
                return Ok(false);
            }
            scan.log("[*] Scan resumed.");
        }
        if scan.is_stopped() {
            return Ok(false);
        }
        self.store.set_progress(ctx.scan_id(), progress)?;
        Ok(true)
    }

    async fn run_stage(
        &self,
        ctx: &ScanContext,
        tool: &'static ToolInfo,
        stdin: Option<String>,
    ) -> Result<ParseResult, PipelineError> {
        let span = info_span!("scan.stage", tool = tool.name);
        async {
            if self.runner.checker().resolve(tool).is_none() {
                return Err(ToolError::NotInstalled(tool.name.to_string()).into());
            }

            let scan = &ctx.scan;
            scan.log(format!("[*] Starting {} against {}", tool.name, ctx.target));
            log::debug!("Scan {}: {}", ctx.scan_id(), tool.command_line(&ctx.target));
            self.store
                .set_step(ctx.scan_id(), &format!("Running {}...", tool.name))?;
            scan.update_stats(|stats| stats.current_tool = Some(tool.name.to_string()));

            let output = self
                .runner
                .run(scan, tool, &tool.args(&ctx.target), stdin)
                .await?;
            scan.log(format!(
                "[+] {} finished: {} lines of output",
                tool.name, output.line_count
            ));
            scan.update_stats(|stats| {
                stats
                    .tool_timings
                    .insert(tool.name.to_string(), "completed".to_string());
            });

            if output.line_count == 0 {
                scan.log(format!("[!] {} returned no output", tool.name));
                return Ok(ParseResult::default());
            }

            let result = self
                .parsers
                .parse(tool.name, self.store.database(), ctx.project_id(), &output.stdout)
                .map_err(|source| PipelineError::Parse {
                    tool: tool.name.to_string(),
                    source,
                })?;
            scan.log(format!(
                "[+] Parsed: {} new, {} duplicates",
                result.new_count, result.duplicate_count
            ));
            log::debug!(
                "{} parsed {} records for scan {}",
                tool.name,
                result.parsed_count,
                ctx.scan_id()
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Merges a stage result into the summary, persists it and updates the
    /// live counters.
    fn record(
        &self,
        ctx: &mut ScanContext,
        tool: &str,
        result: ParseResult,
    ) -> Result<(), PipelineError> {
        ctx.record(tool, result);
        self.store.save_summary(ctx.scan_id(), &ctx.summary)?;
        ctx.scan.update_stats(|stats| match tool {
            "subfinder" => stats.subdomains_found = result.new_count,
            "waybackurls" | "gau" | "katana" => {
                stats.urls_discovered = result.new_count;
                stats.params_classified = result.param_count;
            }
            "nuclei" => stats.findings_count = result.new_count,
            _ => {}
        });
        Ok(())
    }

    fn save_partial(&self, ctx: &ScanContext, status: ScanStatus) -> ScanStatus {
        if let Err(e) = self.store.finish(ctx.scan_id(), status, &ctx.summary, None) {
            log::error!("Failed to persist partial results of {}: {}", ctx.scan_id(), e);
        }
        ctx.scan
            .log(format!("[*] Scan {}. Partial results saved.", status));
        status
    }

    fn fail(&self, ctx: &ScanContext, error: &PipelineError) -> ScanStatus {
        let scan = &ctx.scan;
        match scan.transition(ScanStatus::Failed) {
            Ok(_) => {
                let message = error.to_string();
                log::warn!("Scan {} failed: {}", ctx.scan_id(), message);
                if let Err(e) = self.store.finish(
                    ctx.scan_id(),
                    ScanStatus::Failed,
                    &ctx.summary,
                    Some(message.as_str()),
                ) {
                    log::error!("Failed to persist failure of {}: {}", ctx.scan_id(), e);
                }
                scan.log(format!("[!] SCAN FAILED: {}", message));
                ScanStatus::Failed
            }
            // A cancel or stop landed first; that status wins.
            Err(current) => self.save_partial(ctx, current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serial_test::serial;

    use crate::db::{project_repo, Database};
    use crate::test_support::FakeToolbox;

    const SUBFINDER: &str = "echo a.example.com\necho b.example.com";
    const HTTPX: &str = r#"while read h; do echo "{\"host\":\"$h\",\"status_code\":200}"; done"#;
    const WAYBACK: &str = "echo 'https://a.example.com/item?id=1&q=x'";
    const NUCLEI: &str = r#"while read u; do echo "{\"template-id\":\"t1\",\"info\":{\"severity\":\"low\"},\"matched-at\":\"$u\"}"; done"#;

    struct Harness {
        pipeline: Pipeline,
        store: ScanStore,
        registry: ActiveScanRegistry,
        project_id: String,
    }

    fn harness(toolbox: &FakeToolbox) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let project = project_repo::create(&db, "p", "example.com").unwrap();
        let store = ScanStore::new(db);
        let registry = ActiveScanRegistry::new(Duration::from_secs(60));
        let runner = ToolRunner::new(Arc::new(toolbox.checker()), 20, None);
        Harness {
            pipeline: Pipeline::new(store.clone(), runner, registry.clone()),
            store,
            registry,
            project_id: project.id,
        }
    }

    impl Harness {
        fn context(&self, scan_type: &str) -> ScanContext {
            let job = self
                .store
                .create(&self.project_id, scan_type, "example.com")
                .unwrap();
            let scan = self.registry.register(&job.id, &self.project_id);
            ScanContext::new(scan, ScanType::parse(scan_type).unwrap(), "example.com")
        }
    }

    #[test]
    fn test_line_input_terminates_every_line() {
        assert_eq!(line_input(vec!["a".to_string(), "b".to_string()]), "a\nb\n");
        assert_eq!(line_input(Vec::<String>::new()), "");
    }

    #[tokio::test]
    #[serial]
    async fn test_single_tool_completes() {
        let toolbox = FakeToolbox::new();
        toolbox.install_tool("subfinder", SUBFINDER);
        let h = harness(&toolbox);
        let ctx = h.context("subfinder");
        let scan = ctx.scan.clone();
        let id = ctx.scan_id().to_string();

        assert_eq!(h.pipeline.run(ctx).await, ScanStatus::Completed);

        let job = h.store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.result_summary["subfinder"].new_count, 2);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert_eq!(job.current_step.as_deref(), Some("Running subfinder..."));

        let lines = scan.lines_from(0);
        assert_eq!(lines[0], "[*] Starting subfinder scan on example.com");
        assert_eq!(lines[1], "[*] Starting subfinder against example.com");
        assert!(lines.contains(&"[+] subfinder finished: 2 lines of output".to_string()));
        assert!(lines.contains(&"[+] Parsed: 2 new, 0 duplicates".to_string()));
        assert_eq!(lines.last().unwrap(), "[+] Scan completed successfully!");
        assert!(scan.is_finished());
        assert_eq!(scan.stats().subdomains_found, 2);
        assert_eq!(scan.stats().tool_timings["subfinder"], "completed");
    }

    #[tokio::test]
    #[serial]
    async fn test_full_chain_feeds_hosts_forward() {
        let toolbox = FakeToolbox::new();
        toolbox.install_tool("subfinder", SUBFINDER);
        toolbox.install_tool("httpx", HTTPX);
        toolbox.install_tool("waybackurls", WAYBACK);
        toolbox.install_tool("nuclei", NUCLEI);
        let h = harness(&toolbox);
        let ctx = h.context("full_auto");
        let scan = ctx.scan.clone();
        let id = ctx.scan_id().to_string();

        assert_eq!(h.pipeline.run(ctx).await, ScanStatus::Completed);

        let job = h.store.get(&id).unwrap().unwrap();
        assert_eq!(job.progress, 100);
        let summary = &job.result_summary;
        assert_eq!(summary["subfinder"].new_count, 2);
        assert_eq!(summary["httpx"].duplicate_count, 2);
        assert_eq!(summary["waybackurls"].new_count, 1);
        assert_eq!(summary["waybackurls"].param_count, 2);
        assert_eq!(summary["nuclei"].new_count, 2);

        let stats = scan.stats();
        assert_eq!(stats.urls_discovered, 1);
        assert_eq!(stats.params_classified, 2);
        assert_eq!(stats.findings_count, 2);
        assert_eq!(stats.current_tool.as_deref(), Some("nuclei"));
    }

    #[tokio::test]
    #[serial]
    async fn test_chain_without_subdomains_skips_host_stages() {
        let toolbox = FakeToolbox::new();
        toolbox.install_tool("subfinder", "true");
        toolbox.install_tool("waybackurls", WAYBACK);
        let h = harness(&toolbox);
        let ctx = h.context("full_auto");
        let scan = ctx.scan.clone();
        let id = ctx.scan_id().to_string();

        assert_eq!(h.pipeline.run(ctx).await, ScanStatus::Completed);

        let lines = scan.lines_from(0);
        assert!(lines.contains(&"[!] subfinder returned no output".to_string()));
        assert!(lines.contains(&"[!] No subdomains found, skipping httpx".to_string()));
        assert!(lines.contains(&"[!] No targets for nuclei, skipping".to_string()));

        let job = h.store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.result_summary["subfinder"], ParseResult::default());
        assert!(job.result_summary.contains_key("waybackurls"));
        assert!(!job.result_summary.contains_key("httpx"));
        assert!(!job.result_summary.contains_key("nuclei"));
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_tool_fails_and_keeps_earlier_results() {
        let toolbox = FakeToolbox::new();
        toolbox.install_tool("subfinder", SUBFINDER);
        let h = harness(&toolbox);
        let ctx = h.context("full_auto");
        let scan = ctx.scan.clone();
        let id = ctx.scan_id().to_string();

        assert_eq!(h.pipeline.run(ctx).await, ScanStatus::Failed);

        let job = h.store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, ScanStatus::Failed);
        assert_eq!(
            job.error.as_deref(),
            Some("httpx is not installed. Install it from the tools page first.")
        );
        assert_eq!(job.result_summary["subfinder"].new_count, 2);
        assert_eq!(job.progress, 30);
        assert_eq!(
            scan.lines_from(0).last().unwrap(),
            "[!] SCAN FAILED: httpx is not installed. Install it from the tools page first."
        );
        assert_eq!(scan.status(), ScanStatus::Failed);
    }

    #[tokio::test]
    #[serial]
    async fn test_stopped_before_start_saves_partial() {
        let toolbox = FakeToolbox::new();
        let h = harness(&toolbox);
        let ctx = h.context("subfinder");
        let scan = ctx.scan.clone();
        let id = ctx.scan_id().to_string();
        scan.transition(ScanStatus::Stopped).unwrap();

        assert_eq!(h.pipeline.run(ctx).await, ScanStatus::Stopped);
        let job = h.store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, ScanStatus::Stopped);
        assert!(job.started_at.is_none());
        assert_eq!(
            scan.lines_from(0),
            vec!["[*] Scan stopped. Partial results saved."]
        );
    }
}
