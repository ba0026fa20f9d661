use clap::Parser;
use colored::*;
use std::io::Write;
use std::process;

use oxiscan_core::{
    ConsoleSink, InMemoryScanStore, ScanConfig, ScanManager, ScanStatus, Severity,
};

#[derive(Parser, Debug)]
#[command(
    name = "OXISCAN",
    version,
    about = "Web Application Security Scan Orchestrator",
    override_usage = "oxiscan <target> <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Quick scan:              oxiscan http://target.com
  Verbose mode:            oxiscan http://target.com -v
  Skip the consent prompt: oxiscan http://target.com -y
  With a session token:    oxiscan http://target.com --token eyJhbGciOi...
  Deeper crawl + output:   oxiscan http://target.com --depth 5 -o results
  Web probes only:         oxiscan http://target.com --skip-auth --skip-infra
  Dry-run test:            oxiscan http://target.com --dry-run"
)]
pub struct Args {
    pub target: String,

    #[arg(short = 'o', long, default_value = "scan_results", help = "Output directory for reports and logs")]
    pub output: String,

    #[arg(long, default_value_t = 3, help = "Maximum crawl depth")]
    pub depth: u32,

    #[arg(long, default_value_t = 10, help = "Request timeout in seconds")]
    pub timeout: u64,

    #[arg(long, help = "JWT to analyze (harvested from responses when omitted)")]
    pub token: Option<String>,

    #[arg(long, default_value_t = false, help = "Skip the vulnerability probing phase")]
    pub skip_webapp: bool,

    #[arg(long, default_value_t = false, help = "Skip the token analysis phase")]
    pub skip_auth: bool,

    #[arg(long, default_value_t = false, help = "Skip the external infrastructure tools")]
    pub skip_infra: bool,

    #[arg(short = 'y', long, default_value_t = false, help = "Skip the authorization consent prompt")]
    pub yes: bool,

    #[arg(short = 'v', long, default_value_t = false, help = "Show the whole process (Verbose Mode)")]
    pub verbose: bool,

    #[arg(long, help = "Simulate scan without sending real requests")]
    pub dry_run: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    print_banner();

    if args.dry_run {
        println!("[DRY RUN] Would scan target: {}", args.target);
        return;
    }

    print_scan_config(&args);

    if !args.yes && !confirm_authorization(&args.target) {
        eprint!("{}\r\n", "[!] Scan aborted: authorization not confirmed.".red());
        process::exit(1);
    }

    let config = ScanConfig {
        output_dir: args.output.clone(),
        max_depth: args.depth,
        http_timeout: args.timeout,
        auth_token: args.token.clone(),
        enable_webapp: !args.skip_webapp,
        enable_auth: !args.skip_auth,
        enable_infrastructure: !args.skip_infra,
        verbose: args.verbose,
        ..ScanConfig::default()
    };

    let manager = ScanManager::new(InMemoryScanStore::new_ref(), &args.output);

    let scan_id = match manager.start(&args.target, config, ConsoleSink::new_ref()) {
        Ok(id) => id,
        Err(e) => {
            eprint!("{}\r\n", format!("[!] {}", e).red());
            process::exit(1);
        }
    };

    if let Err(e) = manager.wait(&scan_id).await {
        eprint!("{}\r\n", format!("[!] Scan task failed: {}", e).red());
        process::exit(1);
    }

    match manager.result(&scan_id) {
        Some(report) => {
            print_summary(&report, &args.output, &scan_id);
            if report.status != ScanStatus::Completed {
                process::exit(1);
            }
        }
        None => {
            eprint!("{}\r\n", "[!] Scan produced no report.".red());
            process::exit(1);
        }
    }
}

/// Prints the OXISCAN ASCII banner.
fn print_banner() {
    let banner = r#"
     ::::::::  :::    ::: ::::::::::: ::::::::   ::::::::      :::     ::::    :::
    :+:    :+: :+:    :+:     :+:    :+:    :+: :+:    :+:   :+: :+:   :+:+:   :+:
    +:+    +:+  +:+  +:+      +:+    +:+        +:+         +:+   +:+  :+:+:+  +:+
    +#+    +:+   +#++:+       +#+    +#++:++#++ +#+        +#++:++#++: +#+ +:+ +#+
    +#+    +#+  +#+  +#+      +#+           +#+ +#+        +#+     +#+ +#+  +#+#+#
    #+#    #+# #+#    #+#     #+#    #+#    #+# #+#    #+# #+#     #+# #+#   #+#+#
     ########  ###    ###    ###     ########   ########  ###     ### ###    ####
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

/// Prints the scan configuration summary for the target.
fn print_scan_config(args: &Args) {
    let verbose_label = if args.verbose { "ON" } else { "OFF" };

    print!("{}\r\n", format!("[+] Target:   {}", args.target).green().bold());
    print!("{}\r\n", format!("[+] Depth:    {}", args.depth).blue());
    print!("{}\r\n", format!("[+] Timeout:  {}s", args.timeout).blue());
    print!("{}\r\n", format!("[+] Output:   {}", args.output).blue());
    print!("{}\r\n", format!("[+] Verbose:  {}", verbose_label).magenta());
    if args.token.is_some() {
        print!("{}\r\n", "[+] Token:    supplied".yellow());
    }
    if args.skip_webapp {
        print!("{}\r\n", "[+] Phase:    web probing disabled".yellow());
    }
    if args.skip_auth {
        print!("{}\r\n", "[+] Phase:    token analysis disabled".yellow());
    }
    if args.skip_infra {
        print!("{}\r\n", "[+] Phase:    infrastructure tools disabled".yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

/// Active probing is intrusive. Requires a literal "yes" on stdin unless -y
/// was passed.
fn confirm_authorization(target: &str) -> bool {
    print!(
        "{}\r\n",
        format!(
            "[!] You are about to run active security tests against {}.",
            target
        )
        .yellow()
        .bold()
    );
    print!(
        "{}\r\n",
        "[!] Only proceed if you are authorized to test this system.".yellow()
    );
    print!("{}", "    Type 'yes' to continue: ".bold());
    std::io::stdout().flush().ok();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim().eq_ignore_ascii_case("yes")
}

/// Prints the final severity breakdown and where the artifacts landed.
fn print_summary(report: &oxiscan_core::ScanReport, output_dir: &str, scan_id: &str) {
    let out = |text: &str| {
        print!("{}\r\n", text);
        std::io::stdout().flush().ok();
    };

    out("");
    out(&"══════════════ SCAN SUMMARY ══════════════".bright_white().bold().to_string());
    out(&format!("[+] Scan ID:  {}", scan_id).green().to_string());
    out(&format!("[+] Status:   {}", report.status).green().bold().to_string());

    if let Some(ref summary) = report.summary {
        out(&format!("[+] Duration: {:.1}s", summary.scan_duration).blue().to_string());
        out(&format!("[+] Phases:   {} completed", summary.phases_completed).blue().to_string());
        out(&format!(
            "[+] Findings: {} total",
            summary.total_vulnerabilities
        )
        .bold()
        .to_string());

        for (severity, count) in &summary.by_severity {
            if *count == 0 {
                continue;
            }
            let line = format!("    {:<10} {}", severity.to_string(), count);
            let colored = match severity {
                Severity::Critical => line.red().bold().to_string(),
                Severity::High => line.red().to_string(),
                Severity::Medium => line.yellow().to_string(),
                Severity::Low => line.green().to_string(),
                Severity::Unknown => line.dimmed().to_string(),
            };
            out(&colored);
        }
    }

    out(&format!(
        "[+] Report:   {}/summary_{}.json",
        output_dir, scan_id
    )
    .blue()
    .to_string());
    out(&"──────────────────────────────────────────".dimmed().to_string());
}
