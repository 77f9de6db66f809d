/// Strata walkthrough
///
/// Demonstrates the main operations end to end:
/// - Creating dimension and fact segments through write sessions
/// - Online locking between two sessions
/// - Bitmap distributions, intersection and per-group aggregates
/// - Unary segments built with an appender

use strata::core::config::{Config, WriteMode};
use strata::core::database::Database;
use strata::core::types::{Encoding, FileType, IdFilter, Value};
use strata::query::aggregate::Aggregate;
use strata::query::algebra::SetAlgebra;
use strata::storage::header::SegmentSpec;
use strata::writer::session::StageOutcome;

const RECORDS: u32 = 1000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n╔═══════════════════════════════════════════════╗");
    println!("║        Strata Bitmap Store - Walkthrough      ║");
    println!("╚═══════════════════════════════════════════════╝\n");

    // Step 1: Open database
    let dir = tempfile::tempdir()?;
    let mut config = Config::new(dir.path(), "retail");
    config.mode = WriteMode::Online;
    config.min_records_per_range = 100;
    let db = Database::open(config)?;
    println!("Opened database at {}\n", db.layout().db_dir.display());

    // Step 2: Dimension columns
    println!("Step 2: Writing dimension columns...");
    let positions: Vec<u32> = (0..RECORDS).collect();

    let dim_byte = SegmentSpec::new(Encoding::DimByte, 0)?;
    let mut region = db.create_segment("region", dim_byte, RECORDS)?;
    let values: Vec<Value> = positions.iter().map(|p| Value::Byte((p % 31) as i8 + 1)).collect();
    region.set_write_positions(&positions, &values, false, false)?;
    region.write_to_segment(true)?;

    let mut channel = db.create_segment("channel", dim_byte, RECORDS)?;
    let values: Vec<Value> = positions.iter().map(|p| Value::Byte((p % 3) as i8 + 1)).collect();
    channel.set_write_positions(&positions, &values, false, false)?;
    channel.write_to_segment(true)?;
    println!("  region: 31 values, channel: 3 values\n");

    // Step 3: Fact column
    println!("Step 3: Writing fact column...");
    let mut price = db.create_segment("price", SegmentSpec::new(Encoding::Double, 0)?, RECORDS)?;
    let values: Vec<Value> = positions.iter().map(|p| Value::Double(*p as f64 * 0.5)).collect();
    price.set_write_positions(&positions, &values, false, false)?;
    price.write_to_segment(true)?;
    println!("  price: {} records\n", RECORDS);

    // Step 4: Two sessions contend for the same positions
    println!("Step 4: Online locking...");
    let mut first = db.open_session("channel", FileType::Dimension, 0)?;
    let mut second = db.open_session("channel", FileType::Dimension, 0)?;
    first.set_write_positions(&[10, 11], &[Value::Byte(3), Value::Byte(3)], false, false)?;
    println!("  locked: {:?}", db.locked_positions("channel", 0));

    match second.set_write_positions(&[11, 12], &[Value::Byte(2), Value::Byte(2)], true, false)? {
        StageOutcome::Partial { staged, skipped } => {
            println!("  second session staged {:?}, skipped {:?}", staged, skipped);
        }
        other => println!("  second session: {:?}", other),
    }
    second.rollback()?;
    first.write_to_segment(true)?;
    println!("  after commit, locked: {:?}\n", db.locked_positions("channel", 0));

    // Step 5: Distributions and intersection
    println!("Step 5: Grouping region x channel...");
    let regions = db.distribution("region", 31)?;
    let channels = db.distribution("channel", 3)?;
    for (key, bitmap) in regions.iter().take(3) {
        println!("  region {} -> {} records", key, bitmap.len());
    }
    let groups = SetAlgebra::intersect(&[regions, channels]);
    let cardinalities = SetAlgebra::cardinalities(&groups);
    println!("  {} groups, first: {:?}\n", groups.len(), cardinalities.iter().next());

    // Step 6: Aggregates per group
    println!("Step 6: Aggregating price per group...");
    let prices = db.open_segment("price", FileType::Fact, 0)?;
    let expensive = db.reader().read_value_filter(&prices, 400.0, f64::MAX)?;
    let narrowed = SetAlgebra::restrict(&groups, &expensive);
    let aggregates = Aggregate::over_groups(&prices, &narrowed)?;
    for (key, aggregate) in aggregates.iter().take(5) {
        println!(
            "  {:>5}: count={} sum={:.1} max={:?}",
            key, aggregate.count, aggregate.sum, aggregate.max
        );
    }
    println!();

    // Step 7: Unary segment
    println!("Step 7: Appending visits...");
    let mut visits = db.create_appender("visits", SegmentSpec::new(Encoding::Olap, 0)?, 100)?;
    visits.append_ids(&[3, 99, 512, 3, 700])?;
    visits.commit()?;
    let visits = db.open_segment("visits", FileType::Unary, 0)?;
    let visited = db.reader().read_unary(&visits, IdFilter::new(0, 600))?;
    println!("  visited ids in [0, 600]: {:?}", visited.iter().collect::<Vec<_>>());

    println!("\nDone!");
    Ok(())
}
