use std::path::Path;

use datapac_backend::BackendClient;
use datapac_core::config::{AppConfig, LoadOptions};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub async fn run(json_output: bool, config_path: Option<&Path>) -> CommandResult {
    let report = build_report(config_path).await;
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

async fn build_report(config_path: Option<&Path>) -> DoctorReport {
    let mut checks = Vec::new();
    let options = LoadOptions { config_path: config_path.map(Path::to_path_buf), ..LoadOptions::default() };

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_backend_reachability(&config).await);
            checks.push(check_model_readiness(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("backend_reachability"));
            checks.push(skipped("model_readiness"));
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_fail { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_fail {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because configuration did not load".to_string(),
    }
}

async fn check_backend_reachability(config: &AppConfig) -> DoctorCheck {
    let backend = match BackendClient::new(&config.backend) {
        Ok(backend) => backend,
        Err(error) => {
            return DoctorCheck {
                name: "backend_reachability",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    };

    match backend.tables().await {
        Ok(tables) => DoctorCheck {
            name: "backend_reachability",
            status: CheckStatus::Pass,
            details: format!("{} tables listed by `{}`", tables.len(), backend.tables_url()),
        },
        Err(error) => DoctorCheck {
            name: "backend_reachability",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

/// Credentials are already enforced by config validation; this reports which runtime will answer.
fn check_model_readiness(config: &AppConfig) -> DoctorCheck {
    if !config.llm.is_enabled() {
        return DoctorCheck {
            name: "model_readiness",
            status: CheckStatus::Skipped,
            details: "llm.provider is disabled; questions use the deterministic planner".to_string(),
        };
    }

    DoctorCheck {
        name: "model_readiness",
        status: CheckStatus::Pass,
        details: format!(
            "{:?} model `{}` at {}",
            config.llm.provider,
            config.llm.model,
            config.llm.effective_base_url().unwrap_or_default()
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
