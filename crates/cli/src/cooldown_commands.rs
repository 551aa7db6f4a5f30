use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use {
    clap::Subcommand,
    plume_common::clock::{Clock, SystemClock},
    plume_ledger::LedgerStore,
};

#[derive(Subcommand)]
pub enum CooldownAction {
    /// List ledger entries with remaining cooldown.
    List {
        /// Print the raw ledger as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Clear cooldown entries.
    Reset {
        /// Only clear keys belonging to this provider.
        #[arg(long)]
        provider: Option<String>,
        /// Print what would be cleared without writing.
        #[arg(long)]
        dry_run: bool,
        /// Print the cleared keys as JSON.
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_cooldowns(action: CooldownAction, path: PathBuf) -> anyhow::Result<()> {
    let store = LedgerStore::new(path);
    match action {
        CooldownAction::List { json } => list(&store, json).await,
        CooldownAction::Reset {
            provider,
            dry_run,
            json,
        } => reset(&store, provider, dry_run, json).await,
    }
}

async fn list(store: &LedgerStore, json: bool) -> anyhow::Result<()> {
    let ledger = store.load().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ledger)?);
        return Ok(());
    }
    if ledger.is_empty() {
        println!("No cooldown entries.");
        return Ok(());
    }

    let now = SystemClock.now_ms();
    for (key, entry) in &ledger.entries {
        let mut parts = vec![format!("errors {}", entry.error_count)];
        if let Some(until) = entry.cooldown_until_ms {
            parts.push(describe_block("cooldown", until, now));
        }
        if let Some(until) = entry.disabled_until_ms {
            let reason = entry.disabled_reason.as_deref().unwrap_or("unknown");
            parts.push(format!("{} ({reason})", describe_block("disabled", until, now)));
        }
        println!("{key}: {}", parts.join(", "));

        for (model, stats) in &entry.models {
            let mut line = format!("  {model}: errors {}", stats.error_count);
            if let Some(until) = stats.cooldown_until_ms {
                line.push_str(&format!(", {}", describe_block("cooldown", until, now)));
            }
            println!("{line}");
        }
    }
    Ok(())
}

fn describe_block(label: &str, until_ms: u64, now_ms: u64) -> String {
    if until_ms > now_ms {
        format!("{label} {}s remaining", (until_ms - now_ms).div_ceil(1000))
    } else {
        format!("{label} expired")
    }
}

async fn reset(
    store: &LedgerStore,
    provider: Option<String>,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let cleared = if dry_run {
        let mut ledger = store.load().await?;
        ledger.reset(provider.as_deref())
    } else {
        let cleared = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&cleared);
        store
            .mutate(move |ledger| {
                let mut slot = out.lock().unwrap_or_else(|e| e.into_inner());
                *slot = ledger.reset(provider.as_deref());
            })
            .await?;
        let mut slot = cleared.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *slot)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&cleared)?);
        return Ok(());
    }
    if cleared.is_empty() {
        println!("No matching cooldown entries.");
        return Ok(());
    }
    let verb = if dry_run { "Would clear" } else { "Cleared" };
    for key in &cleared {
        println!("{verb}: {key}");
    }
    Ok(())
}
