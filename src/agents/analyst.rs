use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use async_trait::async_trait;
use serde::Deserialize;
use crate::audit::ExchangeRole;
use crate::errors::WaypointError;
use crate::llm::{extract_json, LLMProvider};
use crate::models::{Confidence, ExploitOutcome, ExploitProof, VulnCategory, VulnerabilityRecord};
use crate::session::state::Session;
use super::agent::{Agent, AgentContext, AgentOutput, AgentPayload, Usage};
use super::registry::{exploit_agents, vuln_agent_for, AgentDefinition, AgentKind, AgentName};
use tracing::{debug, info};

const MAX_CONTEXT_CHARS: usize = 8_000;
const MAX_LISTED_FILES: usize = 300;

/// Hypothesis queue an analysis agent must return.
#[derive(Debug, Deserialize)]
struct HypothesisQueue {
    vulnerabilities: Vec<HypothesisEntry>,
}

#[derive(Debug, Deserialize)]
struct HypothesisEntry {
    hypothesis: String,
    #[serde(default)]
    evidence_ref: Option<String>,
    #[serde(default)]
    confidence: Confidence,
}

/// Verdicts an exploitation agent must return, one per hypothesis.
#[derive(Debug, Deserialize)]
struct VerdictList {
    outcomes: Vec<Verdict>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    vulnerability_id: String,
    exploited: bool,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    observed_response: Option<String>,
    #[serde(default)]
    evidence: Option<String>,
}

/// LLM-backed agent for every analysis node of the graph. Behaviour depends
/// on the node's kind: code review, recon, hypothesis generation,
/// exploitation verdicts, or the executive summary.
pub struct AnalystAgent {
    name: AgentName,
    llm: Arc<dyn LLMProvider>,
}

impl AnalystAgent {
    pub fn new(name: AgentName, llm: Arc<dyn LLMProvider>) -> Self {
        Self { name, llm }
    }

    fn system_prompt(def: &AgentDefinition) -> String {
        let role = match def.kind {
            AgentKind::CodeAnalyst => "a security code reviewer mapping the application's attack surface from source".to_string(),
            AgentKind::ReconAnalyst => "a penetration tester mapping the live application's attack surface".to_string(),
            AgentKind::VulnAnalyzer => format!(
                "a {} vulnerability analyst producing testable hypotheses",
                def.category.map(|c| c.display_name()).unwrap_or("web")
            ),
            AgentKind::Exploiter => format!(
                "an exploitation specialist proving or disproving {} hypotheses against the live target",
                def.category.map(|c| c.display_name()).unwrap_or("web")
            ),
            AgentKind::Reporter => "a report writer summarising only proven, exploited findings".to_string(),
            AgentKind::ToolRunner => "a scanner operator".to_string(),
        };
        format!("You are {}. Work only against the authorised target.", role)
    }

    async fn build_prompt(&self, def: &AgentDefinition, session: &Session, ctx: &AgentContext) -> Result<String, WaypointError> {
        let mut prompt = format!(
            "Target: {}\nSource repository: {}\n\n",
            ctx.target.web_url,
            ctx.target.repo_path.display()
        );
        if !ctx.rules.is_empty() {
            prompt.push_str("## Rules of engagement\n");
            prompt.push_str(&ctx.rules);
            prompt.push_str("\n\n");
        }
        if ctx.pipeline_testing {
            prompt.push_str("Pipeline-testing run: keep the answer minimal.\n\n");
        }

        let dir = &ctx.deliverables_dir;
        match def.kind {
            AgentKind::CodeAnalyst => {
                prompt.push_str("## Repository files\n");
                prompt.push_str(&list_repo_files(&ctx.target.repo_path)?);
                prompt.push_str(
                    "\n\nDescribe entry points, authentication, data stores and dangerous sinks in markdown.\n",
                );
            }
            AgentKind::ReconAnalyst => {
                push_deliverable(&mut prompt, dir, "code_analysis_deliverable.md", "Source code analysis").await;
                push_deliverable(&mut prompt, dir, "pre_recon_tools_deliverable.md", "External scanner output").await;
                prompt.push_str("Produce a markdown map of endpoints, parameters, roles and technologies.\n");
            }
            AgentKind::VulnAnalyzer => {
                push_deliverable(&mut prompt, dir, "code_analysis_deliverable.md", "Source code analysis").await;
                push_deliverable(&mut prompt, dir, "recon_deliverable.md", "Reconnaissance").await;
                let category = def.category.map(|c| c.as_str()).unwrap_or("web");
                prompt.push_str(&format!(
                    "Write your {} analysis in markdown, then end with a JSON block:\n\
                     ```json\n{{\"vulnerabilities\": [{{\"hypothesis\": \"...\", \"evidence_ref\": \"file:line or URL\", \
                     \"confidence\": \"high|medium|low\"}}]}}\n```\n\
                     Return {{\"vulnerabilities\": []}} when nothing is worth testing.\n",
                    category
                ));
            }
            AgentKind::Exploiter => {
                if let Some(category) = def.category {
                    let analysis = vuln_agent_for(category).definition().deliverable;
                    push_deliverable(&mut prompt, dir, analysis, "Analysis").await;
                }
                prompt.push_str("## Hypotheses\n```json\n");
                prompt.push_str(&serde_json::to_string_pretty(&ctx.hypotheses)?);
                prompt.push_str(
                    "\n```\n\nAttempt each hypothesis. Document the evidence in markdown, then end with a JSON block:\n\
                     ```json\n{\"outcomes\": [{\"vulnerability_id\": \"...\", \"exploited\": true, \
                     \"payload\": \"...\", \"observed_response\": \"...\", \"evidence\": \"...\"}]}\n```\n\
                     Every hypothesis needs an explicit `exploited` verdict.\n",
                );
            }
            AgentKind::Reporter => {
                for name in exploit_agents() {
                    let def = name.definition();
                    push_deliverable(&mut prompt, dir, def.deliverable, def.display_name).await;
                }
                let proven: Vec<&VulnerabilityRecord> = session
                    .vulnerabilities
                    .values()
                    .flatten()
                    .filter(|r| r.is_reportable())
                    .collect();
                prompt.push_str("## Proven findings\n```json\n");
                prompt.push_str(&serde_json::to_string_pretty(&proven)?);
                prompt.push_str("\n```\n\nWrite an executive summary covering only these findings.\n");
            }
            AgentKind::ToolRunner => {}
        }
        Ok(prompt)
    }
}

#[async_trait]
impl Agent for AnalystAgent {
    fn name(&self) -> AgentName {
        self.name
    }

    async fn execute(&self, session: &Session, ctx: &AgentContext) -> Result<AgentOutput, WaypointError> {
        let def = self.definition();
        let system = Self::system_prompt(def);
        let prompt = self.build_prompt(def, session, ctx).await?;
        ctx.record(ExchangeRole::System, system.clone());
        ctx.record(ExchangeRole::Prompt, prompt.clone());

        let start = Instant::now();
        let response = self.llm.complete(&prompt, Some(&system)).await?;
        ctx.record(ExchangeRole::Response, response.content.clone());
        let usage = Usage {
            cost_usd: response.cost_usd,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            elapsed_ms: start.elapsed().as_millis() as u64,
            model: Some(response.model.clone()),
        };
        debug!(agent = %self.name, model = %response.model, "LLM response received");

        let mut payload = AgentPayload::default();
        match (def.kind, def.category) {
            (AgentKind::VulnAnalyzer, Some(category)) => match parse_hypotheses(&response.content, category) {
                Ok(records) => {
                    info!(agent = %self.name, hypotheses = records.len(), "Hypothesis queue parsed");
                    payload.vulnerabilities = records;
                }
                Err(e) => return Ok(AgentOutput::unusable(e.to_string(), usage)),
            },
            (AgentKind::Exploiter, Some(_)) => match parse_verdicts(&response.content) {
                Ok(outcomes) => {
                    let missing: Vec<&str> = ctx
                        .hypotheses
                        .iter()
                        .filter(|h| !outcomes.iter().any(|o| o.vulnerability_id == h.id))
                        .map(|h| h.id.as_str())
                        .collect();
                    if !missing.is_empty() {
                        return Ok(AgentOutput::unusable(
                            format!("No verdict for hypotheses: {}", missing.join(", ")),
                            usage,
                        ));
                    }
                    payload.exploitation = outcomes;
                }
                Err(e) => return Ok(AgentOutput::unusable(e.to_string(), usage)),
            },
            _ => {}
        }

        tokio::fs::create_dir_all(&ctx.deliverables_dir).await?;
        let path = ctx.deliverable_path();
        tokio::fs::write(&path, &response.content).await?;
        payload.deliverables.push(path);
        Ok(AgentOutput::succeeded(payload, usage))
    }
}

fn parse_hypotheses(text: &str, category: VulnCategory) -> Result<Vec<VulnerabilityRecord>, WaypointError> {
    let value = extract_json(text)?;
    let queue: HypothesisQueue = serde_json::from_value(value)
        .map_err(|e| WaypointError::OutputValidation(format!("Malformed hypothesis queue: {}", e)))?;
    Ok(queue
        .vulnerabilities
        .into_iter()
        .map(|entry| VulnerabilityRecord {
            evidence_ref: entry.evidence_ref,
            confidence: entry.confidence,
            ..VulnerabilityRecord::hypothesis(category, entry.hypothesis)
        })
        .collect())
}

fn parse_verdicts(text: &str) -> Result<Vec<ExploitOutcome>, WaypointError> {
    let value = extract_json(text)?;
    let list: VerdictList = serde_json::from_value(value)
        .map_err(|e| WaypointError::OutputValidation(format!("Malformed exploitation verdicts: {}", e)))?;
    Ok(list
        .outcomes
        .into_iter()
        .map(|v| {
            let proof = match (v.exploited, v.payload) {
                (true, Some(payload)) => Some(ExploitProof {
                    payload,
                    observed_response: v.observed_response.unwrap_or_default(),
                    evidence: v.evidence,
                }),
                _ => None,
            };
            ExploitOutcome { vulnerability_id: v.vulnerability_id, exploited: v.exploited, proof }
        })
        .collect())
}

async fn push_deliverable(prompt: &mut String, dir: &Path, file: &str, heading: &str) {
    if let Ok(content) = tokio::fs::read_to_string(dir.join(file)).await {
        let clipped: String = content.chars().take(MAX_CONTEXT_CHARS).collect();
        prompt.push_str(&format!("## {}\n{}\n\n", heading, clipped));
    }
}

fn list_repo_files(repo: &Path) -> Result<String, WaypointError> {
    let pattern = repo.join("**").join("*");
    let entries = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| WaypointError::Internal(format!("Invalid repository glob: {}", e)))?;
    let mut files = Vec::new();
    for path in entries.flatten() {
        let Ok(relative) = path.strip_prefix(repo) else { continue };
        let first = relative.components().next().map(|c| c.as_os_str().to_string_lossy().to_string());
        if matches!(first.as_deref(), Some(".git") | Some("deliverables")) || !path.is_file() {
            continue;
        }
        files.push(relative.display().to_string());
        if files.len() >= MAX_LISTED_FILES {
            files.push("...".into());
            break;
        }
    }
    Ok(files.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LLMResponse;
    use crate::session::state::TargetDescriptor;
    use tempfile::TempDir;

    struct Canned(String);

    #[async_trait]
    impl LLMProvider for Canned {
        async fn complete(&self, _prompt: &str, _system: Option<&str>) -> Result<LLMResponse, WaypointError> {
            Ok(LLMResponse {
                content: self.0.clone(),
                input_tokens: Some(100),
                output_tokens: Some(50),
                cost_usd: Some(0.01),
                model: "canned".into(),
            })
        }
        fn provider_name(&self) -> &str { "canned" }
        fn model_name(&self) -> &str { "canned" }
    }

    fn session(dir: &TempDir) -> Session {
        Session::new(
            "s".into(),
            TargetDescriptor { web_url: "https://shop.test".into(), repo_path: dir.path().into(), config_path: None },
            "fp".into(),
        )
    }

    #[tokio::test]
    async fn test_vuln_agent_parses_queue_and_writes_deliverable() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);
        let reply = "Analysis...\n```json\n{\"vulnerabilities\": [{\"hypothesis\": \"SQLi in /search?q\", \"confidence\": \"high\"}]}\n```";
        let agent = AnalystAgent::new(AgentName::InjectionVuln, Arc::new(Canned(reply.into())));
        let ctx = AgentContext::new(&s, AgentName::InjectionVuln, dir.path().join("deliverables"), String::new());
        let attempt = ctx.for_attempt(1);

        let output = agent.execute(&s, &attempt).await.unwrap();
        assert!(output.success);
        assert_eq!(output.payload.vulnerabilities.len(), 1);
        assert_eq!(output.payload.vulnerabilities[0].category, VulnCategory::Injection);
        assert_eq!(output.payload.vulnerabilities[0].confidence, Confidence::High);
        assert!(dir.path().join("deliverables/injection_analysis_deliverable.md").exists());
        assert_eq!(attempt.take_transcript().len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_queue_is_unusable() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);
        let agent = AnalystAgent::new(AgentName::XssVuln, Arc::new(Canned("no json here".into())));
        let ctx = AgentContext::new(&s, AgentName::XssVuln, dir.path().join("deliverables"), String::new());
        let output = agent.execute(&s, &ctx.for_attempt(1)).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.usage.cost_usd, Some(0.01));
    }

    #[test]
    fn test_verdict_without_exploited_flag_rejected() {
        assert!(parse_verdicts("{\"outcomes\": [{\"vulnerability_id\": \"xss-1\"}]}").is_err());
        let ok = parse_verdicts(
            "{\"outcomes\": [{\"vulnerability_id\": \"xss-1\", \"exploited\": true, \"payload\": \"<svg onload=1>\"}]}",
        )
        .unwrap();
        assert!(ok[0].exploited);
        assert_eq!(ok[0].proof.as_ref().unwrap().payload, "<svg onload=1>");
    }

    #[tokio::test]
    async fn test_exploiter_requires_verdict_for_every_hypothesis() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        let mut h1 = VulnerabilityRecord::hypothesis(VulnCategory::Xss, "a");
        h1.id = "xss-1".into();
        let mut h2 = VulnerabilityRecord::hypothesis(VulnCategory::Xss, "b");
        h2.id = "xss-2".into();
        s.vulnerabilities.insert(VulnCategory::Xss, vec![h1, h2]);

        let reply = "{\"outcomes\": [{\"vulnerability_id\": \"xss-1\", \"exploited\": false}]}";
        let agent = AnalystAgent::new(AgentName::XssExploit, Arc::new(Canned(reply.into())));
        let ctx = AgentContext::new(&s, AgentName::XssExploit, dir.path().join("deliverables"), String::new());
        assert_eq!(ctx.hypotheses.len(), 2);
        let output = agent.execute(&s, &ctx.for_attempt(1)).await.unwrap();
        assert!(!output.success);
        assert!(output.note.unwrap().contains("xss-2"));
    }

    #[test]
    fn test_list_repo_files_skips_git_and_deliverables() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::create_dir_all(dir.path().join("deliverables")).unwrap();
        std::fs::write(dir.path().join("deliverables/x.md"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/app.py"), "print()").unwrap();

        let listing = list_repo_files(dir.path()).unwrap();
        assert_eq!(listing, format!("src{}app.py", std::path::MAIN_SEPARATOR));
    }
}
