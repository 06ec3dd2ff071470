use crate::cli::commands::{ListArgs, ShowArgs};
use crate::db::Database;
use crate::errors::HoundError;

pub async fn handle_show(args: ShowArgs) -> Result<(), HoundError> {
    let db = Database::new(&args.db)?;
    match db.get_run(&args.run_id)? {
        Some(run) => {
            println!("{}", serde_json::to_string_pretty(&run)?);
            Ok(())
        }
        None => Err(HoundError::Database(format!(
            "No run with id {}",
            args.run_id
        ))),
    }
}

pub async fn handle_list(args: ListArgs) -> Result<(), HoundError> {
    let db = Database::new(&args.db)?;
    let runs = db.list_runs(args.limit, args.offset)?;
    for run in &runs {
        println!(
            "{}  {:9}  {}@{}  {}",
            run["id"].as_str().unwrap_or("?"),
            run["outcome"].as_str().unwrap_or("?"),
            run["package"].as_str().unwrap_or("?"),
            run["version"].as_str().unwrap_or("*"),
            run["created_at"].as_str().unwrap_or("?"),
        );
    }
    if runs.is_empty() {
        println!("No stored runs");
    }
    Ok(())
}
