//! # Seed Data Generator
//!
//! Populates the database with a development catalog and student roll.
//!
//! ## Usage
//! ```bash
//! # 3 copies per title, 60 students (defaults)
//! cargo run -p libris-db --bin seed
//!
//! # Custom amounts
//! cargo run -p libris-db --bin seed -- --copies 5 --students 200
//!
//! # Specify database path
//! cargo run -p libris-db --bin seed -- --db ./data/libris.db
//! ```
//!
//! ## Generated Data
//! - One title per entry in `TITLES`, each with its category and loan period
//! - `--copies` copies per title, serial `{PREFIX}-{NNN}`
//! - `--students` students spread across forms 7A..11C, number `{YEAR}-{NNNN}`

use chrono::{Datelike, Utc};
use libris_core::{BlacklistState, BookCopy, BookTitle, CopyStatus, LoanPeriod, Student};
use libris_db::{Database, DbConfig};
use std::env;
use uuid::Uuid;

/// (serial prefix, title, author, category, period value, period unit)
const TITLES: &[(&str, &str, &str, &str, i64, &str)] = &[
    ("HOB", "The Hobbit", "J. R. R. Tolkien", "Fiction", 2, "weeks"),
    ("DUNE", "Dune", "Frank Herbert", "Fiction", 2, "weeks"),
    ("MOCK", "To Kill a Mockingbird", "Harper Lee", "Fiction", 2, "weeks"),
    ("1984", "Nineteen Eighty-Four", "George Orwell", "Fiction", 2, "weeks"),
    ("BRIEF", "A Brief History of Time", "Stephen Hawking", "Science", 3, "weeks"),
    ("COSMOS", "Cosmos", "Carl Sagan", "Science", 3, "weeks"),
    ("GENE", "The Selfish Gene", "Richard Dawkins", "Science", 3, "weeks"),
    ("SAPI", "Sapiens", "Yuval Noah Harari", "History", 1, "months"),
    ("GUNS", "Guns, Germs, and Steel", "Jared Diamond", "History", 1, "months"),
    ("ATLAS", "World Atlas", "National Geographic", "Reference", 3, "days"),
    ("DICT", "Oxford English Dictionary", "Oxford University Press", "Reference", 24, "hours"),
    ("CALC", "Calculus Made Easy", "Silvanus P. Thompson", "Mathematics", 1, "months"),
    ("EUCL", "Elements", "Euclid", "Mathematics", 1, "years"),
];

const FIRST_NAMES: &[&str] = &[
    "Amara", "Ben", "Chloe", "Dev", "Elif", "Finn", "Grace", "Hiro", "Isla", "Jonah",
    "Kemi", "Liam", "Maya", "Noor", "Oscar", "Priya",
];

const LAST_NAMES: &[&str] = &[
    "Adeyemi", "Brown", "Chen", "Dubois", "Evans", "Fischer", "Garcia", "Haddad", "Ivanova",
    "Jones", "Khan", "Larsen",
];

const FORMS: &[&str] = &[
    "7A", "7B", "8A", "8B", "9A", "9B", "10A", "10B", "11A", "11B", "11C",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut copies_per_title: usize = 3;
    let mut student_count: usize = 60;
    let mut db_path = String::from("./libris_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--copies" | "-c" => {
                if i + 1 < args.len() {
                    copies_per_title = args[i + 1].parse().unwrap_or(3);
                    i += 1;
                }
            }
            "--students" | "-s" => {
                if i + 1 < args.len() {
                    student_count = args[i + 1].parse().unwrap_or(60);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Libris Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --copies <N>     Copies per title (default: 3)");
                println!("  -s, --students <N>   Students to register (default: 60)");
                println!("  -d, --db <PATH>      Database file path (default: ./libris_dev.db)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Libris Seed Data Generator");
    println!("==========================");
    println!("Database: {}", db_path);
    println!("Titles:   {} ({} copies each)", TITLES.len(), copies_per_title);
    println!("Students: {}", student_count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.students().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} students", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let now = Utc::now();

    let mut copies = 0;
    for (prefix, name, author, category, value, unit) in TITLES {
        let title = BookTitle {
            id: Uuid::new_v4().to_string(),
            title: name.to_string(),
            author: author.to_string(),
            category: category.to_string(),
            default_period: LoanPeriod::parse(*value, unit)?,
            created_at: now,
            updated_at: now,
        };
        db.catalog().insert_title(&title).await?;

        for n in 1..=copies_per_title {
            let copy = BookCopy {
                id: Uuid::new_v4().to_string(),
                title_id: title.id.clone(),
                serial: format!("{}-{:03}", prefix, n),
                status: CopyStatus::Available,
                created_at: now,
                updated_at: now,
            };

            if let Err(e) = db.catalog().insert_copy(&copy).await {
                eprintln!("Failed to insert {}: {}", copy.serial, e);
                continue;
            }
            copies += 1;
        }
    }
    println!("✓ Inserted {} titles, {} copies", TITLES.len(), copies);

    let mut students = 0;
    for n in 0..student_count {
        let student = generate_student(n, now.year());

        if let Err(e) = db.students().insert(&student).await {
            eprintln!("Failed to insert {}: {}", student.student_number, e);
            continue;
        }
        students += 1;
    }
    println!("✓ Inserted {} students", students);

    println!();
    println!("✓ Seed complete in {:?}", start.elapsed());

    Ok(())
}

/// Generates a student with a deterministic name and form.
fn generate_student(seed: usize, year: i32) -> Student {
    let now = Utc::now();
    let first = FIRST_NAMES[seed % FIRST_NAMES.len()];
    let last = LAST_NAMES[(seed * 7) % LAST_NAMES.len()];

    Student {
        id: Uuid::new_v4().to_string(),
        student_number: format!("{}-{:04}", year, seed + 1),
        full_name: format!("{} {}", first, last),
        class_name: Some(FORMS[seed % FORMS.len()].to_string()),
        email: Some(format!(
            "{}.{}{}@school.example",
            first.to_lowercase(),
            last.to_lowercase(),
            seed + 1
        )),
        blacklist: BlacklistState::Clear,
        created_at: now,
        updated_at: now,
    }
}
