//! Command parsing and execution.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Local, Utc};
use tracing::warn;
use uuid::Uuid;

use emoncache_core::auth::CredentialStore;
use emoncache_core::composite::CompositeViewState;
use emoncache_core::config::Config;
use emoncache_core::page::PageStatus;
use emoncache_core::refresh::{PageSource, RefreshCoordinator, TriggerSource};
use emoncache_core::{
    AccountIdentity, AccountStore, AppCategory, AppConfig, DateRange, HttpEmonApi, PageId,
};

pub const USAGE: &str = "\
Usage: emoncache <command>

Commands:
  accounts                                  List configured accounts
  add <url> <api-key>                       Add an account
  remove <account-id>                       Remove an account and its cache
  dashboards <account-id>                   Refresh and list dashboards
  feed <account-id> <feed-id> [hours]       Refresh and print one feed (default 8 hours)
  add-app <account-id> <category> <name> <field=feed>...
                                            Configure an app (MyElectric, MySolar, MySolarDivert)
  app <account-id> <app-id> [hours]         Refresh every page of an app";

/// Default window for feed and app pages
const DEFAULT_HOURS: i64 = 8;

/// Page id of the dashboard list
const DASHBOARDS_PAGE: &str = "dashboards";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Accounts,
    Add { url: String, api_key: String },
    Remove { account: Uuid },
    Dashboards { account: Uuid },
    Feed { account: Uuid, feed: String, hours: i64 },
    AddApp { account: Uuid, category: AppCategory, name: String, feeds: Vec<(String, String)> },
    App { account: Uuid, app: String, hours: i64 },
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let (name, rest) = args.split_first().ok_or_else(|| anyhow!("No command given"))?;
        let arg = |i: usize, what: &str| -> Result<&str> {
            rest.get(i)
                .map(|s| s.as_str())
                .ok_or_else(|| anyhow!("Missing {}", what))
        };
        let account = |i: usize| -> Result<Uuid> {
            let raw = arg(i, "account id")?;
            Uuid::parse_str(raw).with_context(|| format!("Invalid account id: {}", raw))
        };
        let hours = |i: usize| -> Result<i64> {
            match rest.get(i) {
                Some(raw) => {
                    let hours: i64 = raw.parse().with_context(|| format!("Invalid hours: {}", raw))?;
                    if hours <= 0 {
                        bail!("Hours must be positive");
                    }
                    window(hours)?;
                    Ok(hours)
                }
                None => Ok(DEFAULT_HOURS),
            }
        };

        match name.as_str() {
            "accounts" => Ok(Command::Accounts),
            "add" => Ok(Command::Add {
                url: arg(0, "url")?.to_string(),
                api_key: arg(1, "api key")?.to_string(),
            }),
            "remove" => Ok(Command::Remove { account: account(0)? }),
            "dashboards" => Ok(Command::Dashboards { account: account(0)? }),
            "feed" => Ok(Command::Feed {
                account: account(0)?,
                feed: arg(1, "feed id")?.to_string(),
                hours: hours(2)?,
            }),
            "add-app" => {
                let raw_category = arg(1, "category")?;
                let category = AppCategory::from_name(raw_category)
                    .ok_or_else(|| anyhow!("Unknown app category: {}", raw_category))?;
                let feeds = rest
                    .iter()
                    .skip(3)
                    .map(|pair| {
                        pair.split_once('=')
                            .map(|(field, feed)| (field.to_string(), feed.to_string()))
                            .ok_or_else(|| anyhow!("Expected field=feed, got {}", pair))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Command::AddApp {
                    account: account(0)?,
                    category,
                    name: arg(2, "app name")?.to_string(),
                    feeds,
                })
            }
            "app" => Ok(Command::App {
                account: account(0)?,
                app: arg(1, "app id")?.to_string(),
                hours: hours(2)?,
            }),
            other => bail!("Unknown command: {}", other),
        }
    }
}

pub async fn run(command: Command) -> Result<()> {
    let mut config = Config::load()?;

    match command {
        Command::Accounts => {
            if config.accounts.is_empty() {
                println!("No accounts configured");
            }
            for entry in &config.accounts {
                let marker = if config.selected_account == Some(entry.id) { "*" } else { " " };
                let key = if CredentialStore::has_credentials(entry.id) { "" } else { " (no API key)" };
                println!("{} {}  {}{}", marker, entry.id, entry.url, key);
            }
        }
        Command::Add { url, api_key } => {
            let identity = AccountIdentity::generate(url, api_key);
            CredentialStore::store(&identity)?;
            config.upsert_account(&identity);
            config.save()?;
            println!("Added account {}", identity.id());
        }
        Command::Remove { account } => {
            let entry = config
                .remove_account(account)
                .ok_or_else(|| anyhow!("No such account: {}", account))?;
            let store = AccountStore::new(config.store_root()?);
            store.delete(&entry.identity(String::new()))?;
            if let Err(e) = CredentialStore::delete(account) {
                warn!(account = %account, error = %e, "Failed to delete API key");
            }
            config.save()?;
            println!("Removed account {}", account);
        }
        Command::Dashboards { account } => {
            let identity = identity_for(&config, account)?;
            let (store, mut coordinator) = open_coordinator(&config, &identity)?;
            let page = PageId::from(DASHBOARDS_PAGE);
            let now = Utc::now();
            coordinator.add_page(page.clone(), PageSource::Dashboards, DateRange::new(now, now)?)?;
            coordinator.trigger(&page, TriggerSource::Manual)?;
            coordinator.settle().await;

            print_status(coordinator.page(&page).map(|p| p.status()));
            println!("Last updated: {}", format_updated(coordinator.store().last_updated(DASHBOARDS_PAGE), Utc::now()));
            let dashboards = coordinator.store().dashboards();
            if dashboards.is_empty() {
                println!("No dashboards. Emoncms may need upgrading to list dashboards.");
            }
            for dashboard in dashboards {
                println!("{:>5}  {:<30} {}", dashboard.id, dashboard.name, dashboard.description);
                println!("       {}", dashboard.url(identity.endpoint_url(), identity.api_key()));
            }
            store.close(coordinator.close());
        }
        Command::Feed { account, feed, hours } => {
            let identity = identity_for(&config, account)?;
            let (store, mut coordinator) = open_coordinator(&config, &identity)?;
            let page = PageId::new(format!("feed:{}", feed));
            let range = window(hours)?;
            coordinator.add_page(page.clone(), PageSource::Feeds(vec![feed.clone()]), range)?;
            coordinator.trigger(&page, TriggerSource::Manual)?;
            coordinator.settle().await;

            print_status(coordinator.page(&page).map(|p| p.status()));
            for point in coordinator.store().series(page.as_str(), &feed).iter().filter(|p| range.contains(p.time)) {
                println!("{}  {}", point.time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"), point.value);
            }
            store.close(coordinator.close());
        }
        Command::AddApp { account, category, name, feeds } => {
            let entry = config
                .account_mut(account)
                .ok_or_else(|| anyhow!("No such account: {}", account))?;
            let mut app = AppConfig::new(Uuid::new_v4().simple().to_string(), name, category);
            for (field, feed) in feeds {
                app = app.with_feed(&field, feed);
            }
            app.validate().with_context(|| {
                let fields: Vec<&str> = category.feed_config_fields().iter().map(|f| f.id).collect();
                format!("{} needs feeds for: {}", category.display_name(), fields.join(", "))
            })?;
            let app_id = app.id.clone();
            entry.apps.push(app);
            config.save()?;
            println!("Added app {}", app_id);
        }
        Command::App { account, app, hours } => {
            let identity = identity_for(&config, account)?;
            let app = config
                .account(account)
                .and_then(|entry| entry.apps.iter().find(|a| a.id == app))
                .cloned()
                .ok_or_else(|| anyhow!("No such app: {}", app))?;
            let (store, mut coordinator) = open_coordinator(&config, &identity)?;
            let range = window(hours)?;
            let composite = CompositeViewState::for_app(&app, range, &mut coordinator)?;
            coordinator.trigger_all(TriggerSource::Manual);
            coordinator.settle().await;

            println!("{} ({})", composite.title(), app.category.display_name());
            for page in composite.pages() {
                print!("  {:<20} ", page);
                print_status(coordinator.page(page).map(|p| p.status()));
            }
            println!("Ready: {:?}", composite.readiness(&coordinator));
            store.close(coordinator.close());
        }
    }

    Ok(())
}

/// The last `hours` hours up to now.
fn window(hours: i64) -> Result<DateRange> {
    let duration = Duration::try_hours(hours).ok_or_else(|| anyhow!("Too many hours: {}", hours))?;
    Ok(DateRange::last(duration, Utc::now())?)
}

fn identity_for(config: &Config, account: Uuid) -> Result<AccountIdentity> {
    let entry = config
        .account(account)
        .ok_or_else(|| anyhow!("No such account: {}", account))?;
    let api_key = CredentialStore::get_api_key(account)?;
    Ok(entry.identity(api_key))
}

fn open_coordinator(
    config: &Config,
    identity: &AccountIdentity,
) -> Result<(AccountStore, RefreshCoordinator<HttpEmonApi>)> {
    let store = AccountStore::new(config.store_root()?);
    let handle = store
        .open(identity)
        .with_context(|| format!("Failed to open store for {}", identity))?;
    let api = HttpEmonApi::new(identity)?;
    Ok((store, RefreshCoordinator::new(handle, api)))
}

fn print_status(status: Option<&PageStatus>) {
    match status {
        Some(PageStatus::Loading) | None => println!("Loading"),
        Some(PageStatus::Error(reason)) => println!("Error: {}", reason),
        Some(PageStatus::Loaded(at)) => println!("Loaded at {}", at.with_timezone(&Local).format("%H:%M:%S")),
    }
}

/// "Last updated" text: the time only within a day, date and time when older.
fn format_updated(time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match time {
        None => "Never".to_string(),
        Some(time) if now - time > Duration::days(1) => {
            time.with_timezone(&Local).format("%b %e, %Y %H:%M").to_string()
        }
        Some(time) => time.with_timezone(&Local).format("%H:%M:%S").to_string(),
    }
}
