use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use relay::{ReadyState, Sequencer, TrialPlan, TriggerRelay};
use shared::domain::{PageLocation, QueryParameters, SettingsForm, RELAY_PORT};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Runs the SSVEP trial loop and relays its timing to the stim server.
#[derive(Parser, Debug)]
struct Args {
    /// Address the stimulus page is served from; its query string seeds the settings.
    #[arg(long, default_value = "http://localhost:8080/")]
    page_url: String,
    /// Settings form entry, e.g. `--form trial_dur=3000`. May be repeated.
    #[arg(long = "form", value_name = "FIELD=VALUE", value_parser = parse_form_entry)]
    form: Vec<(String, String)>,
    #[arg(long, default_value_t = RELAY_PORT)]
    ws_port: u16,
    /// Seed for the inter-trial jitter.
    #[arg(long)]
    seed: Option<u64>,
    /// How long to wait for the relay socket before the first trial.
    #[arg(long, default_value_t = 500)]
    connect_wait_ms: u64,
}

fn parse_form_entry(raw: &str) -> Result<(String, String), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{raw}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in '{raw}'"));
    }
    Ok((field.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let page = PageLocation::parse(&args.page_url)?;
    let query = QueryParameters::from_query(page.query());

    let relay = TriggerRelay::with_port(args.ws_port);
    relay.connect(&page)?;

    let mut form = SettingsForm::from(&query);
    for (field, value) in &args.form {
        form.set(field, value.as_str())?;
    }
    let params = form.submit().context("invalid task settings")?;
    let plan = TrialPlan::new(params);
    info!(
        strobe_freq = params.strobe_freq(),
        trials = params.trials(),
        trial_dur = params.trial_dur(),
        isi_jitter = params.isi_jitter(),
        reversals = plan.reversals(),
        reversal_period_ms = plan.reversal_period().as_millis() as u64,
        "task settings"
    );

    wait_for_open(&relay, Duration::from_millis(args.connect_wait_ms)).await;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let summary = Sequencer::new(&relay, plan).run(&mut rng).await;
    info!(
        trials = summary.trials,
        reversals = summary.reversals,
        "stimulation complete"
    );
    Ok(())
}

/// Gives the socket a moment to open; the run proceeds either way.
async fn wait_for_open(relay: &TriggerRelay, limit: Duration) {
    let opened = tokio::time::timeout(limit, async {
        loop {
            match relay.ready_state() {
                Some(ReadyState::Open) => return true,
                Some(ReadyState::Connecting) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                _ => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    if !opened {
        warn!("relay socket not open; triggers will be dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_entries_split_on_first_equals() {
        assert_eq!(
            parse_form_entry("trial_dur = 3000"),
            Ok(("trial_dur".to_string(), "3000".to_string()))
        );
        assert_eq!(
            parse_form_entry("label=a=b"),
            Ok(("label".to_string(), "a=b".to_string()))
        );
        assert!(parse_form_entry("trials").is_err());
        assert!(parse_form_entry("=5").is_err());
    }

    #[test]
    fn args_collect_repeated_form_entries() {
        let args = Args::try_parse_from([
            "stimulus",
            "--page-url",
            "https://lab.local/?trials=4",
            "--form",
            "strobe_freq=15",
            "--form",
            "isi_jitter=250",
            "--seed",
            "9",
        ])
        .expect("args");
        assert_eq!(args.form.len(), 2);
        assert_eq!(args.ws_port, RELAY_PORT);
        assert_eq!(args.seed, Some(9));
        assert_eq!(args.connect_wait_ms, 500);

        let page = PageLocation::parse(&args.page_url).expect("page");
        let mut form = SettingsForm::from(&QueryParameters::from_query(page.query()));
        for (field, value) in &args.form {
            form.set(field, value.as_str()).expect("known field");
        }
        let params = form.submit().expect("valid");
        assert_eq!(params.trials(), 4);
        assert_eq!(params.strobe_freq(), 15.0);
        assert_eq!(params.isi_jitter(), 250);
    }

    #[tokio::test]
    async fn waiting_gives_up_when_never_connected() {
        let relay = TriggerRelay::new();
        wait_for_open(&relay, Duration::from_millis(20)).await;
        assert_eq!(relay.ready_state(), None);
    }
}
