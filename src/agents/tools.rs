use std::net::IpAddr;
use std::process::Stdio;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use crate::audit::ExchangeRole;
use crate::config::types::Scanner;
use crate::errors::WaypointError;
use crate::session::state::Session;
use crate::utils::truncation::truncate_output;
use super::agent::{Agent, AgentContext, AgentOutput, AgentPayload, Usage};
use super::registry::AgentName;
use tracing::{debug, info, warn};

const SCANNER_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanStatus {
    Completed,
    NotInstalled,
    NotApplicable,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scanner: Scanner,
    pub status: ScanStatus,
    pub command: String,
    pub open_ports: Vec<String>,
    #[serde(skip)]
    pub output: String,
}

/// Runs the external scanners (nmap, subfinder, whatweb) against the target
/// host and writes their combined output as the agent's deliverable.
pub struct ToolRunnerAgent {
    name: AgentName,
    scanners: Vec<Scanner>,
    timeout: Duration,
}

impl ToolRunnerAgent {
    pub fn new(name: AgentName, scanners: Vec<Scanner>) -> Self {
        Self { name, scanners, timeout: SCANNER_TIMEOUT }
    }

    fn command_for(&self, scanner: Scanner, url: &str, host: &str) -> Option<Vec<String>> {
        let args: Vec<&str> = match scanner {
            Scanner::Nmap => vec!["-sV", "-T4", "--top-ports", "1000", host],
            // subdomain enumeration is meaningless for bare IPs and localhost
            Scanner::Subfinder if host.parse::<IpAddr>().is_ok() || !host.contains('.') => return None,
            Scanner::Subfinder => vec!["-d", host, "-silent"],
            Scanner::Whatweb => vec!["--color=never", "-a", "1", url],
        };
        Some(args.into_iter().map(str::to_string).collect())
    }

    async fn run_scanner(&self, scanner: Scanner, url: &str, host: &str, ctx: &AgentContext) -> Result<ScanReport, WaypointError> {
        let binary = scanner.binary();
        let Some(args) = self.command_for(scanner, url, host) else {
            return Ok(ScanReport {
                scanner,
                status: ScanStatus::NotApplicable,
                command: String::new(),
                open_ports: Vec::new(),
                output: format!("{} skipped for host {}", binary, host),
            });
        };
        let command = format!("{} {}", binary, args.join(" "));
        ctx.record(ExchangeRole::Tool, format!("$ {}", command));
        debug!(command = %command, "Running scanner");

        let mut cmd = tokio::process::Command::new(binary);
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(scanner = binary, "Scanner not installed, skipping");
                return Ok(ScanReport {
                    scanner,
                    status: ScanStatus::NotInstalled,
                    command,
                    open_ports: Vec::new(),
                    output: format!("{} is not installed", binary),
                });
            }
            Err(e) => return Err(WaypointError::Tool(format!("Failed to start {}: {}", binary, e))),
        };

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| WaypointError::Timeout(format!("{} timed out after {}s", binary, self.timeout.as_secs())))?
            .map_err(|e| WaypointError::Tool(format!("{} failed: {}", binary, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let text = truncate_output(&format!("{}{}", stdout, stderr));
        ctx.record(ExchangeRole::Tool, text.clone());

        let status = if output.status.success() { ScanStatus::Completed } else { ScanStatus::Failed };
        let open_ports = if scanner == Scanner::Nmap { parse_open_ports(&stdout)? } else { Vec::new() };
        Ok(ScanReport { scanner, status, command, open_ports, output: text })
    }
}

#[async_trait]
impl Agent for ToolRunnerAgent {
    fn name(&self) -> AgentName {
        self.name
    }

    async fn execute(&self, _session: &Session, ctx: &AgentContext) -> Result<AgentOutput, WaypointError> {
        let start = Instant::now();
        tokio::fs::create_dir_all(&ctx.deliverables_dir).await?;
        let path = ctx.deliverable_path();

        if ctx.pipeline_testing {
            tokio::fs::write(&path, "# External Scanners\n\nSkipped in pipeline-testing mode.\n").await?;
            let payload = AgentPayload { deliverables: vec![path], ..Default::default() };
            return Ok(AgentOutput::succeeded(payload, Usage { elapsed_ms: start.elapsed().as_millis() as u64, ..Default::default() }));
        }

        let url = ctx.target.web_url.as_str();
        let host = host_of(url)?;
        let mut reports = Vec::new();
        for scanner in &self.scanners {
            reports.push(self.run_scanner(*scanner, url, &host, ctx).await?);
        }

        let ran = reports.iter().filter(|r| r.status == ScanStatus::Completed).count();
        let failed: Vec<_> = reports.iter().filter(|r| r.status == ScanStatus::Failed).collect();
        if !failed.is_empty() && ran == 0 {
            let names: Vec<&str> = failed.iter().map(|r| r.scanner.binary()).collect();
            return Err(WaypointError::Tool(format!("Every scanner failed: {}", names.join(", "))));
        }
        info!(host = %host, ran, total = reports.len(), "External scanners finished");

        tokio::fs::write(&path, render_deliverable(&host, &reports)).await?;
        let payload = AgentPayload {
            deliverables: vec![path],
            data: Some(serde_json::to_value(&reports)?),
            ..Default::default()
        };
        Ok(AgentOutput::succeeded(payload, Usage { elapsed_ms: start.elapsed().as_millis() as u64, ..Default::default() }))
    }
}

/// Host part of an http(s) URL, without port or path.
pub fn host_of(url: &str) -> Result<String, WaypointError> {
    let rest = url
        .split_once("://")
        .map(|(_, r)| r)
        .ok_or_else(|| WaypointError::InvalidTarget(format!("Not a URL: {}", url)))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    let host = if let Some(stripped) = authority.strip_prefix('[') {
        stripped.split(']').next().unwrap_or("")
    } else {
        authority.split(':').next().unwrap_or("")
    };
    if host.is_empty() {
        return Err(WaypointError::InvalidTarget(format!("No host in URL: {}", url)));
    }
    Ok(host.to_string())
}

fn parse_open_ports(nmap_output: &str) -> Result<Vec<String>, WaypointError> {
    let re = Regex::new(r"(?m)^(\d+)/(tcp|udp)\s+open\s+(\S+)")
        .map_err(|e| WaypointError::Internal(format!("Bad port regex: {}", e)))?;
    Ok(re
        .captures_iter(nmap_output)
        .map(|c| format!("{}/{} {}", &c[1], &c[2], &c[3]))
        .collect())
}

fn render_deliverable(host: &str, reports: &[ScanReport]) -> String {
    let mut md = format!("# External Scanners\n\nHost: `{}`\n\n", host);
    for report in reports {
        md.push_str(&format!("## {}\n\nStatus: {:?}\n\n", report.scanner.binary(), report.status));
        if !report.command.is_empty() {
            md.push_str(&format!("Command: `{}`\n\n", report.command));
        }
        if !report.open_ports.is_empty() {
            md.push_str("Open ports:\n");
            for port in &report.open_ports {
                md.push_str(&format!("- {}\n", port));
            }
            md.push('\n');
        }
        md.push_str("```\n");
        md.push_str(&report.output);
        md.push_str("\n```\n\n");
    }
    md
}
