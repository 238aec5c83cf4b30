use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use nest_core::blob_store::CHECKSUM_SUFFIX;
use nest_core::export::{export_all, export_collection};
use nest_core::integrity::{IntegrityReport, KeyStatus};
use nest_core::key_manager::KEY_SLOT;
use nest_core::passcode::{PASSCODE_ENABLED_KEY, PASSCODE_KEY};
use nest_core::paths;
use nest_core::records::{
    BabyProfile, JournalEntry, MemoryItem, MemoryKind, Mood, NurseShiftRecord, ProgressEntry,
    ShiftKind, Units, UserPreferences,
};
use nest_core::secure_storage::KeyringBackend;
use nest_core::{NestStore, StoreConfig};

#[derive(Parser)]
#[command(name = "nest", author, version)]
#[command(about = "Encrypted local journal store for NICU parents", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (defaults to <data-dir>/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep the device key in the OS keyring instead of the data directory
    #[arg(long, global = true)]
    keyring: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, device key and seed data
    Init,

    /// Show store status
    Status,

    /// Journal entries
    #[command(subcommand)]
    Journal(JournalCommand),

    /// Growth and feeding progress
    #[command(subcommand)]
    Progress(ProgressCommand),

    /// Memories and milestones
    #[command(subcommand)]
    Memory(MemoryCommand),

    /// Nurse shift log
    #[command(subcommand)]
    Shifts(ShiftCommand),

    /// User preferences
    #[command(subcommand)]
    Prefs(PrefsCommand),

    /// Local passcode
    #[command(subcommand)]
    Passcode(PasscodeCommand),

    /// Free-form encrypted fields
    #[command(subcommand)]
    Secure(SecureCommand),

    /// Baby profile (encrypted)
    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Export records as JSON
    Export {
        /// Export a single collection
        #[arg(long, value_enum)]
        collection: Option<CollectionName>,

        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run one integrity check over the critical keys
    Check,

    /// Run the integrity monitor until interrupted
    Monitor,

    /// Delete every stored entry and the device key
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum JournalCommand {
    List,
    Add {
        title: String,
        content: String,
        #[arg(long, value_parser = parse_wire_name::<Mood>, default_value = "calm")]
        mood: Mood,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long, value_parser = parse_wire_name::<Mood>)]
        mood: Option<Mood>,
    },
    Delete {
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum ProgressCommand {
    List,
    Add {
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        length: Option<f64>,
        #[arg(long)]
        head: Option<f64>,
        #[arg(long)]
        feeding: Option<f64>,
        #[arg(long, default_value = "")]
        notes: String,
    },
    Delete {
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum MemoryCommand {
    List,
    Add {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// milestone, firstTime, photo or note
        #[arg(long, value_parser = parse_wire_name::<MemoryKind>, default_value = "note")]
        kind: MemoryKind,
    },
    Delete {
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum ShiftCommand {
    List,
    Add {
        nurse: String,
        #[arg(long, value_parser = parse_wire_name::<ShiftKind>, default_value = "day")]
        shift: ShiftKind,
        #[arg(long, default_value = "")]
        notes: String,
    },
    Delete {
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum PrefsCommand {
    Show,
    Set {
        #[arg(long)]
        parent_name: Option<String>,
        #[arg(long)]
        baby_name: Option<String>,
        #[arg(long)]
        notifications: Option<bool>,
        #[arg(long, value_parser = parse_wire_name::<Units>)]
        units: Option<Units>,
        /// Hour of the daily reminder (0-23); negative clears it
        #[arg(long, allow_hyphen_values = true)]
        reminder_hour: Option<i8>,
    },
}

#[derive(Subcommand)]
enum PasscodeCommand {
    Set { passcode: String },
    Verify { passcode: String },
    Change { old: String, new: String },
    Remove,
    Status,
}

#[derive(Subcommand)]
enum SecureCommand {
    Put { key: String, value: String },
    Get { key: String },
    Remove { key: String },
}

#[derive(Subcommand)]
enum ProfileCommand {
    Show,
    Set {
        name: String,
        #[arg(long)]
        birth_date: NaiveDate,
        #[arg(long)]
        due_date: Option<NaiveDate>,
        #[arg(long)]
        weeks: Option<u8>,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        hospital: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CollectionName {
    Journal,
    Progress,
    Memories,
    Shifts,
}

/// Parse a serde-named enum variant from its wire name.
fn parse_wire_name<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|e| e.to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(cli: &Cli) -> Result<NestStore> {
    let config = StoreConfig::load(cli.config.as_deref(), cli.data_dir.clone())?;
    let store = if cli.keyring {
        let account = config.resolved_data_dir()?.display().to_string();
        NestStore::open_with_key_slot(config, Arc::new(KeyringBackend::new(&account)))?
    } else {
        NestStore::open(config)?
    };
    Ok(store)
}

fn is_reserved(key: &str) -> bool {
    key == KEY_SLOT
        || key == PASSCODE_KEY
        || key == PASSCODE_ENABLED_KEY
        || key.ends_with(CHECKSUM_SUFFIX)
}

fn status_label(status: KeyStatus) -> String {
    match status {
        KeyStatus::Intact => "intact".into(),
        KeyStatus::Absent => "absent".into(),
        KeyStatus::Purged(reason) => format!("purged ({reason:?})"),
        KeyStatus::Skipped => "skipped".into(),
    }
}

fn report_json(report: &IntegrityReport) -> serde_json::Value {
    let results: serde_json::Map<String, serde_json::Value> = report
        .results
        .iter()
        .map(|(key, status)| (key.clone(), status_label(*status).into()))
        .collect();
    serde_json::json!({
        "checkedAt": report.checked_at.to_rfc3339(),
        "clean": report.is_clean(),
        "results": results,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init => init_command(&cli),
        Commands::Status => status_command(&cli),
        Commands::Journal(cmd) => journal_command(&cli, cmd),
        Commands::Progress(cmd) => progress_command(&cli, cmd),
        Commands::Memory(cmd) => memory_command(&cli, cmd),
        Commands::Shifts(cmd) => shift_command(&cli, cmd),
        Commands::Prefs(cmd) => prefs_command(&cli, cmd),
        Commands::Passcode(cmd) => passcode_command(&cli, cmd),
        Commands::Secure(cmd) => secure_command(&cli, cmd),
        Commands::Profile(cmd) => profile_command(&cli, cmd),
        Commands::Export { collection, out } => export_command(&cli, *collection, out.as_ref()),
        Commands::Check => check_command(&cli),
        Commands::Monitor => monitor_command(&cli).await,
        Commands::Reset { yes } => reset_command(&cli, *yes),
    }
}

fn init_command(cli: &Cli) -> Result<()> {
    let store = open_store(cli)?;
    let data_dir = store.config().resolved_data_dir()?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| paths::config_path(&data_dir));
    if !config_path.exists() {
        store.config().save(&config_path)?;
        info!(path = %config_path.display(), "default configuration written");
    }
    println!("Store initialised at {}", data_dir.display());
    status_command(cli)
}

fn status_command(cli: &Cli) -> Result<()> {
    let store = open_store(cli)?;
    let records = store.records();
    print_json(&serde_json::json!({
        "dataDir": store.config().resolved_data_dir()?,
        "encryption": store.encryption_mode(),
        "keyFingerprint": store.key_manager().fingerprint(),
        "passcodeEnabled": store.passcode().is_enabled(),
        "integrityIntervalSecs": store.config().integrity_interval_secs,
        "criticalKeys": store.monitor().critical_keys(),
        "counts": {
            "journalEntries": records.journal.len(),
            "progressEntries": records.progress.len(),
            "memoryItems": records.memories.len(),
            "nurseShifts": records.nurse_shifts.len(),
        },
    }))
}

fn journal_command(cli: &Cli, cmd: &JournalCommand) -> Result<()> {
    let mut store = open_store(cli)?;
    let journal = &mut store.records_mut().journal;
    match cmd {
        JournalCommand::List => print_json(&journal.records()),
        JournalCommand::Add {
            title,
            content,
            mood,
        } => {
            let id = journal.add(JournalEntry::new(title.as_str(), content.as_str(), *mood))?;
            println!("{id}");
            Ok(())
        }
        JournalCommand::Update {
            id,
            title,
            content,
            mood,
        } => {
            let mut entry = journal
                .get(*id)
                .cloned()
                .ok_or_else(|| anyhow!("no journal entry with id {id}"))?;
            if let Some(title) = title {
                entry.title = title.clone();
            }
            if let Some(content) = content {
                entry.content = content.clone();
            }
            if let Some(mood) = mood {
                entry.mood = *mood;
            }
            journal.update(entry)?;
            println!("updated {id}");
            Ok(())
        }
        JournalCommand::Delete { id } => report_delete(journal.delete(*id)?, id),
    }
}

fn progress_command(cli: &Cli, cmd: &ProgressCommand) -> Result<()> {
    let mut store = open_store(cli)?;
    let progress = &mut store.records_mut().progress;
    match cmd {
        ProgressCommand::List => print_json(&progress.records()),
        ProgressCommand::Add {
            weight,
            length,
            head,
            feeding,
            notes,
        } => {
            if weight.is_none() && length.is_none() && head.is_none() && feeding.is_none() {
                bail!("at least one measurement is required");
            }
            let entry = ProgressEntry {
                length_cm: *length,
                head_circumference_cm: *head,
                feeding_ml: *feeding,
                ..ProgressEntry::new(*weight, notes.as_str())
            };
            println!("{}", progress.add(entry)?);
            Ok(())
        }
        ProgressCommand::Delete { id } => report_delete(progress.delete(*id)?, id),
    }
}

fn memory_command(cli: &Cli, cmd: &MemoryCommand) -> Result<()> {
    let mut store = open_store(cli)?;
    let memories = &mut store.records_mut().memories;
    match cmd {
        MemoryCommand::List => print_json(&memories.records()),
        MemoryCommand::Add {
            title,
            description,
            kind,
        } => {
            let id = memories.add(MemoryItem::new(title.as_str(), description.as_str(), *kind))?;
            println!("{id}");
            Ok(())
        }
        MemoryCommand::Delete { id } => report_delete(memories.delete(*id)?, id),
    }
}

fn shift_command(cli: &Cli, cmd: &ShiftCommand) -> Result<()> {
    let mut store = open_store(cli)?;
    let shifts = &mut store.records_mut().nurse_shifts;
    match cmd {
        ShiftCommand::List => print_json(&shifts.records()),
        ShiftCommand::Add {
            nurse,
            shift,
            notes,
        } => {
            let id = shifts.add(NurseShiftRecord::new(nurse.as_str(), *shift, notes.as_str()))?;
            println!("{id}");
            Ok(())
        }
        ShiftCommand::Delete { id } => report_delete(shifts.delete(*id)?, id),
    }
}

fn report_delete(deleted: bool, id: &Uuid) -> Result<()> {
    if deleted {
        println!("deleted {id}");
    } else {
        println!("nothing matched {id}");
    }
    Ok(())
}

fn prefs_command(cli: &Cli, cmd: &PrefsCommand) -> Result<()> {
    let mut store = open_store(cli)?;
    match cmd {
        PrefsCommand::Show => print_json(store.records().preferences.get()),
        PrefsCommand::Set {
            parent_name,
            baby_name,
            notifications,
            units,
            reminder_hour,
        } => {
            let mut prefs: UserPreferences = store.records().preferences.get().clone();
            if let Some(name) = parent_name {
                prefs.parent_name = name.clone();
            }
            if let Some(name) = baby_name {
                prefs.baby_name = name.clone();
            }
            if let Some(enabled) = notifications {
                prefs.notifications_enabled = *enabled;
            }
            if let Some(units) = units {
                prefs.units = *units;
            }
            match reminder_hour {
                Some(hour) if *hour > 23 => bail!("reminder hour must be between 0 and 23"),
                Some(hour) if *hour < 0 => prefs.daily_reminder_hour = None,
                Some(hour) => prefs.daily_reminder_hour = Some(*hour as u8),
                None => {}
            }
            store.update_preferences(prefs)?;
            print_json(store.records().preferences.get())
        }
    }
}

fn passcode_command(cli: &Cli, cmd: &PasscodeCommand) -> Result<()> {
    let store = open_store(cli)?;
    let gate = store.passcode();
    match cmd {
        PasscodeCommand::Set { passcode } => {
            if !gate.set(passcode) {
                bail!("passcode must be at least 4 characters");
            }
            println!("passcode set");
        }
        PasscodeCommand::Verify { passcode } => {
            if !gate.verify(passcode) {
                bail!("incorrect passcode, try again");
            }
            println!("ok");
        }
        PasscodeCommand::Change { old, new } => {
            if !gate.change(old, new) {
                bail!("passcode not changed");
            }
            println!("passcode changed");
        }
        PasscodeCommand::Remove => {
            gate.remove()?;
            println!("passcode removed");
        }
        PasscodeCommand::Status => {
            let state = if gate.is_enabled() { "enabled" } else { "disabled" };
            println!("{state}");
        }
    }
    Ok(())
}

fn secure_command(cli: &Cli, cmd: &SecureCommand) -> Result<()> {
    let store = open_store(cli)?;
    let fields = store.secure_records();
    match cmd {
        SecureCommand::Put { key, value } => {
            if is_reserved(key) {
                bail!("{key} is reserved");
            }
            fields.put_field(key, value)?;
            println!("stored {key}");
        }
        SecureCommand::Get { key } => match fields.field(key)? {
            Some(value) => println!("{value}"),
            None => bail!("{key} not found"),
        },
        SecureCommand::Remove { key } => {
            if is_reserved(key) {
                bail!("{key} is reserved");
            }
            fields.remove_field(key)?;
            println!("removed {key}");
        }
    }
    Ok(())
}

fn profile_command(cli: &Cli, cmd: &ProfileCommand) -> Result<()> {
    let store = open_store(cli)?;
    match cmd {
        ProfileCommand::Show => match store.secure_records().baby_profile()? {
            Some(profile) => print_json(&profile),
            None => {
                println!("no profile stored");
                Ok(())
            }
        },
        ProfileCommand::Set {
            name,
            birth_date,
            due_date,
            weeks,
            weight,
            hospital,
        } => {
            let profile = BabyProfile {
                name: name.clone(),
                birth_date: *birth_date,
                due_date: *due_date,
                gestational_age_weeks: *weeks,
                birth_weight_grams: *weight,
                hospital: hospital.clone(),
            };
            store.secure_records().save_baby_profile(&profile)?;
            print_json(&profile)
        }
    }
}

fn export_command(
    cli: &Cli,
    collection: Option<CollectionName>,
    out: Option<&PathBuf>,
) -> Result<()> {
    let store = open_store(cli)?;
    let version = store.config().app_version.as_str();
    let records = store.records();
    let json = match collection {
        None => export_all(records, version).to_json()?,
        Some(CollectionName::Journal) => export_collection(&records.journal, version).to_json()?,
        Some(CollectionName::Progress) => export_collection(&records.progress, version).to_json()?,
        Some(CollectionName::Memories) => export_collection(&records.memories, version).to_json()?,
        Some(CollectionName::Shifts) => {
            export_collection(&records.nurse_shifts, version).to_json()?
        }
    };
    match out {
        Some(path) => {
            std::fs::write(path, json)?;
            info!(path = %path.display(), "export written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn check_command(cli: &Cli) -> Result<()> {
    let mut store = open_store(cli)?;
    let mut events = store.subscribe();
    let report = store.check_integrity();
    while let Ok(event) = events.try_recv() {
        store.handle_corruption(&event)?;
    }
    print_json(&report_json(&report))
}

async fn monitor_command(cli: &Cli) -> Result<()> {
    let mut store = open_store(cli)?;
    let mut events = store.subscribe();
    let handle = store.start_monitor();
    handle.check_now();

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_json(&event)?;
                    store.handle_corruption(&event)?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "corruption events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            res = &mut ctrl_c => {
                res?;
                info!("interrupted, stopping monitor");
                break;
            }
        }
    }
    handle.stop().await;
    Ok(())
}

fn reset_command(cli: &Cli, yes: bool) -> Result<()> {
    if !yes {
        bail!("reset deletes every record and the device key; pass --yes to confirm");
    }
    let store = open_store(cli)?;
    store.reset()?;
    println!("store reset");
    Ok(())
}
