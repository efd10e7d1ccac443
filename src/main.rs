//! CLI entry point wrapping the four engine operations.
//!
//! Each subcommand runs to completion and prints its report as JSON on
//! stdout — the same shape the admin layer consumes. Cron invokes `collect`
//! and `evaluate`; webhooks invoke `remove`.
//!
//! Usage:
//!   campaign-exp resolve <campaign.json>
//!   campaign-exp collect <campaign.json>
//!   campaign-exp evaluate <campaign.json>
//!   campaign-exp remove <campaign_id> <card_id>...

use serde_json::{json, Value};

use campaign_exp::campaign::cache::update_base_cache_after_move;
use campaign_exp::campaign::collector::collect_base_cards;
use campaign_exp::campaign::evaluator::evaluate_campaign;
use campaign_exp::campaign::resolver::resolve_expiration_config;
use campaign_exp::campaign::{CollectReport, ExpireReport};
use campaign_exp::config::{snapshot_db_path, CrmConfig};
use campaign_exp::crm::KeyCrmClient;
use campaign_exp::store::SqliteStore;
use campaign_exp::util::now_ms;

fn usage() -> ! {
    eprintln!(
        "usage: campaign-exp <resolve|collect|evaluate> <campaign.json>\n       campaign-exp remove <campaign_id> <card_id>..."
    );
    std::process::exit(2);
}

fn read_campaign(path: &str) -> Value {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("cannot read {}: {}", path, e);
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("cannot parse {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

fn open_store() -> SqliteStore {
    let path = snapshot_db_path();
    match SqliteStore::open(&path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("cannot open snapshot store at {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("cannot serialize report: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        usage();
    };

    match command {
        "resolve" => {
            let [_, path] = args.as_slice() else { usage() };
            let campaign = read_campaign(path);
            match resolve_expiration_config(&campaign) {
                Some(config) => print_json(&json!({"ok": true, "config": config})),
                None => print_json(&json!({
                    "ok": false,
                    "message": "expiration_not_configured"
                })),
            }
        }
        "collect" => {
            let [_, path] = args.as_slice() else { usage() };
            let campaign = read_campaign(path);
            // Credential check happens here, before any I/O; the error text
            // travels in the report so operators see what is unset.
            let report = match CrmConfig::from_env() {
                Ok(config) => {
                    let client = KeyCrmClient::new(&config);
                    let store = open_store();
                    collect_base_cards(&campaign, &client, &store).await
                }
                Err(e) => CollectReport::failed(e.to_string()),
            };
            print_json(&report);
        }
        "evaluate" => {
            let [_, path] = args.as_slice() else { usage() };
            let campaign = read_campaign(path);
            let report = match CrmConfig::from_env() {
                Ok(config) => {
                    let client = KeyCrmClient::new(&config);
                    let store = open_store();
                    evaluate_campaign(&campaign, &client, &store, now_ms()).await
                }
                Err(e) => ExpireReport::failed(None, e.to_string()),
            };
            print_json(&report);
        }
        "remove" => {
            let [_, campaign_id, card_ids @ ..] = args.as_slice() else {
                usage()
            };
            let store = open_store();
            match update_base_cache_after_move(&store, campaign_id, card_ids, now_ms()) {
                Ok(Some(cache)) => print_json(&json!({"ok": true, "cache": cache})),
                Ok(None) => print_json(&json!({"ok": true, "cache": Value::Null})),
                Err(e) => {
                    print_json(&json!({"ok": false, "message": e.to_string()}));
                    std::process::exit(1);
                }
            }
        }
        _ => usage(),
    }
}
