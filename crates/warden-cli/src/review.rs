//! Line-oriented review flows.
//!
//! `--review-server` connects to the downstream, shows its live
//! configuration against the pinned baseline, and asks whether to approve
//! it. `--review-quarantine` lists held tool responses or releases one.
//! Both print through the sanitizer so a hostile server cannot repaint the
//! reviewer's terminal.

use std::io::Write;
use std::sync::Arc;

use tracing::warn;

use warden_proxy::sanitize::{sanitize_text, SanitizeMode};
use warden_proxy::{DownstreamClient, Transport};
use warden_store::{ApprovalState, ApprovalStore, QuarantineStore, ServerSnapshot};
use warden_types::config::WrapperConfig;

use crate::{EXIT_DECLINED, EXIT_OK, EXIT_UNREACHABLE, EXIT_USAGE};

/// Connect to the configured downstream, present its configuration, and
/// approve it if the reviewer agrees.
pub async fn review_server(config: &WrapperConfig) -> u8 {
    let approvals = match ApprovalStore::open(config.server_config_file.clone()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_USAGE;
        }
    };

    let transport = match Transport::connect(&config.identity).await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            eprintln!("Error: cannot reach downstream server: {e}");
            return EXIT_UNREACHABLE;
        }
    };
    let downstream = DownstreamClient::new(transport);

    let snapshot = match fetch_snapshot(&downstream).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("Error: downstream initialization failed: {e}");
            return EXIT_UNREACHABLE;
        }
    };
    let evaluation = approvals.evaluate(&config.identity, &snapshot);
    let mode = SanitizeMode::from_flag(config.visualize_ansi_codes);

    println!("Server: {}", config.identity);
    println!();
    match &snapshot.instructions {
        Some(text) => {
            println!(
                "Instructions [{}]:",
                state_label(evaluation.instructions_state)
            );
            for line in sanitize_text(text, mode).lines() {
                println!("    {line}");
            }
        }
        None => println!(
            "Instructions [{}]: (none declared)",
            state_label(evaluation.instructions_state)
        ),
    }
    println!();

    if snapshot.tools.is_empty() {
        println!("Tools: none");
    } else {
        println!("Tools:");
        for (name, spec) in &snapshot.tools {
            let state = evaluation
                .tool_states
                .get(name)
                .copied()
                .unwrap_or(ApprovalState::New);
            println!("  {} [{}]", name, state_label(state));
            // The full text matters for exactly the tools under review.
            if state != ApprovalState::Approved {
                for line in sanitize_text(&spec.description, mode).lines() {
                    println!("      {line}");
                }
            }
        }
    }
    println!();

    if evaluation.blocked_tool_count() == 0
        && evaluation.instructions_state == ApprovalState::Approved
    {
        println!("This configuration is already fully approved.");
        let _ = downstream.close().await;
        return EXIT_OK;
    }

    let approved = confirm("Approve this configuration? [y/N] ");
    let _ = downstream.close().await;

    if !approved {
        println!("Configuration not approved.");
        return EXIT_DECLINED;
    }

    match approvals.approve_all(&config.identity, &snapshot) {
        Ok(()) => {
            println!("Configuration approved.");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: failed to record approval: {e}");
            EXIT_USAGE
        }
    }
}

async fn fetch_snapshot(
    downstream: &DownstreamClient,
) -> Result<ServerSnapshot, warden_types::errors::WardenError> {
    let summary = downstream.initialize().await?;
    let tools = downstream.list_tools().await?;
    Ok(ServerSnapshot::from_parts(summary.instructions, tools))
}

/// Print every pinned server with a one-line summary.
pub fn list_pinned_servers(store: &ApprovalStore) -> u8 {
    let records = match store.list_identities() {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_USAGE;
        }
    };

    if records.is_empty() {
        println!("No servers pinned yet.");
        return EXIT_OK;
    }

    println!("Pinned servers:");
    for (identity, record) in records {
        let instructions = if record.instructions_hash.is_some() {
            "instructions approved"
        } else {
            "instructions not approved"
        };
        println!(
            "  {} - {} approved tools, {}, last updated {}",
            identity,
            record.tool_hashes.len(),
            instructions,
            record.last_updated_at.to_rfc3339(),
        );
    }
    EXIT_OK
}

/// List quarantined responses, or review and release one by id.
pub fn review_quarantine(store: &QuarantineStore, id: Option<&str>) -> u8 {
    let Some(raw_id) = id else {
        return list_quarantine(store);
    };

    let id = match uuid::Uuid::parse_str(raw_id) {
        Ok(id) => id,
        Err(_) => {
            eprintln!("Error: '{raw_id}' is not a valid quarantine id");
            return EXIT_USAGE;
        }
    };
    let entry = match store.get(id) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            eprintln!("Error: no quarantined response with id {id}");
            return EXIT_USAGE;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_USAGE;
        }
    };

    println!("Quarantined response {id}");
    println!("  Server:  {}", entry.server_identity);
    println!("  Tool:    {}", entry.tool_name);
    println!("  Held at: {}", entry.created_at.to_rfc3339());
    println!("  Verdict: {:?}", entry.guardrail_verdict);
    println!("  Request: {}", entry.request_args);
    println!("  Response:");
    let rendered =
        serde_json::to_string_pretty(&entry.response).unwrap_or_else(|_| entry.response.to_string());
    for line in sanitize_text(&rendered, SanitizeMode::Strip).lines() {
        println!("    {line}");
    }

    if entry.released {
        println!("This response is already released.");
        return EXIT_OK;
    }

    if !confirm("Release this response to the host? [y/N] ") {
        println!("Response remains quarantined.");
        return EXIT_DECLINED;
    }
    match store.release(id) {
        Ok(true) => {
            println!("Response released; the host can now fetch it with quarantine_release.");
            EXIT_OK
        }
        Ok(false) => {
            eprintln!("Error: entry disappeared during review");
            EXIT_USAGE
        }
        Err(e) => {
            eprintln!("Error: {e}");
            EXIT_USAGE
        }
    }
}

fn list_quarantine(store: &QuarantineStore) -> u8 {
    let entries = match store.list(false) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_USAGE;
        }
    };

    if entries.is_empty() {
        println!("Quarantine is empty.");
        return EXIT_OK;
    }

    println!("Quarantined responses awaiting review:");
    for entry in entries {
        println!(
            "  {} - tool '{}' from {} at {}",
            entry.id,
            entry.tool_name,
            entry.server_identity,
            entry.created_at.to_rfc3339(),
        );
    }
    println!();
    println!("Review one with: mcp-warden --review-quarantine --quarantine-id <id>");
    EXIT_OK
}

fn state_label(state: ApprovalState) -> &'static str {
    match state {
        ApprovalState::Approved => "approved",
        ApprovalState::Drift => "CHANGED",
        ApprovalState::New => "NEW",
    }
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt}");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        warn!("failed to read from stdin, treating as decline");
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
