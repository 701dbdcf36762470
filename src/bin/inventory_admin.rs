//! inventory_admin - offline maintenance of the inventory document
//!
//! Runs against the same document the daemon uses. When the daemon is running,
//! enable `cross_process_lock` in both so their writes do not interleave.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use shelfscan::{InventoryItem, InventoryStore, ShelfscanConfig};

#[derive(Parser, Debug)]
#[command(name = "inventory_admin", about = "Inspect and edit the shelfscan inventory")]
struct Args {
    /// Inventory document (defaults to the configured inventory_path)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Take the cross-process file lock even if the config does not enable it
    #[arg(long)]
    lock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all records
    List {
        #[arg(long)]
        json: bool,
    },

    /// Add a record, or increment an existing one with the same name
    Add {
        name: String,
        #[arg(long, default_value = "grocery")]
        category: String,
        #[arg(long, default_value_t = 1)]
        qty: u32,
    },

    /// Set the quantity of an existing record
    SetQty { name: String, qty: u32 },

    /// Delete one record by name or id
    Delete {
        #[arg(long, conflicts_with = "id")]
        name: Option<String>,
        #[arg(long)]
        id: Option<u64>,
    },

    /// Remove every record
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = ShelfscanConfig::load()?;
    let path = args.db.unwrap_or(config.inventory_path);
    let store = InventoryStore::open(path, args.lock || config.cross_process_lock);

    match args.command {
        Command::List { json } => {
            let items = store.get_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("(empty)");
            } else {
                for item in &items {
                    print_item(item);
                }
            }
        }
        Command::Add {
            name,
            category,
            qty,
        } => {
            let item = store.add_or_increment(&name, &category, qty, None)?;
            print_item(&item);
        }
        Command::SetQty { name, qty } => match store.update_qty(&name, qty)? {
            Some(item) => print_item(&item),
            None => return Err(anyhow!("no record named '{}'", name)),
        },
        Command::Delete { name, id } => {
            let removed = match (name, id) {
                (Some(name), None) => store.delete_by_name(&name)?,
                (None, Some(id)) => store.delete_by_id(id)?,
                _ => return Err(anyhow!("pass exactly one of --name or --id")),
            };
            if !removed {
                return Err(anyhow!("no matching record"));
            }
            println!("deleted");
        }
        Command::Clear { yes } => {
            if !yes {
                return Err(anyhow!("refusing to clear without --yes"));
            }
            store.clear()?;
            println!("inventory cleared");
        }
    }
    Ok(())
}

fn print_item(item: &InventoryItem) {
    let pose = item
        .pose
        .map(|p| format!(" pose=({:.3}, {:.3}, {:.3})", p.x, p.y, p.z))
        .unwrap_or_default();
    println!(
        "{:>4}  {:<24} {:<10} qty={:<4} {}{}",
        item.id, item.name, item.category, item.qty, item.timestamp, pose
    );
}
