use std::{env, fs, path::PathBuf};

fn store_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        clap::arg!(-c --config <FILE> "Config file (default: $GLEANER_CONFIG, then ./gleaner.toml)")
            .value_parser(clap::value_parser!(std::path::PathBuf)),
    )
    .arg(clap::arg!(--database_url <URL> "PostgreSQL URL; overrides storage.database_url"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=OUT_DIR");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let completions_dir = out_dir.join("completions");

    fs::create_dir_all(&completions_dir).unwrap();

    let run = clap::Command::new("run")
        .about("Process a batch of candidates read as JSON lines")
        .arg(clap::arg!(--candidates <FILE> "Candidate file, or '-' for stdin").required(true))
        .arg(clap::arg!(--force_refresh "Re-fetch and re-extract candidates that already have a winner"))
        .arg(clap::arg!(--max_candidates <NUM> "Stop after this many candidates"))
        .arg(
            clap::arg!(--documents_dir <DIR> "Directory for cached documents and attempt outputs")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(clap::arg!(--no_cache "Bypass the fetch cache"))
        .arg(clap::arg!(--concurrency <NUM> "Candidates processed at once"))
        .arg(clap::arg!(--deadline_secs <SECS> "Cancel the run after this many seconds"));

    let health = clap::Command::new("health")
        .about("Show the weakest domain/method pairs")
        .arg(clap::arg!(--limit <NUM> "Rows to show").default_value("20"))
        .arg(clap::arg!(--json "Print JSON instead of a table"));

    let mut cmd = clap::Command::new("gleaner")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Adaptive article extraction")
        .arg(clap::arg!(-v --verbose "Enable debug logging").global(true))
        .subcommand(store_args(run))
        .subcommand(store_args(health))
        .subcommand(
            clap::Command::new("identify")
                .about("Print the canonical URL, candidate id and domain of a URL")
                .arg(clap::arg!(<URL> "URL to identify")),
        )
        .subcommand(
            clap::Command::new("completions")
                .about("Generate a shell completion script")
                .arg(clap::arg!(<SHELL> "Target shell").value_parser(["bash", "zsh", "fish", "powershell", "elvish"])),
        );

    clap_complete::generate_to(clap_complete::shells::Bash, &mut cmd, "gleaner", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Zsh, &mut cmd, "gleaner", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Fish, &mut cmd, "gleaner", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::PowerShell, &mut cmd, "gleaner", &completions_dir).unwrap();

    println!(
        "cargo:warning=Shell completions generated in: {}",
        completions_dir.display()
    );
}
