use colored::*;
use restaker::{EligibilityDecision, RunOutcome, RunReport};

/// Print a run report for a human at the terminal.
pub fn display(report: &RunReport) {
    println!();
    println!("{}", "═".repeat(60));

    match report.outcome {
        RunOutcome::Succeeded => {
            println!("{} {}", "✅ SUCCEEDED:".green().bold(), report.message());
        }
        RunOutcome::Skipped => {
            println!("{} {}", "⏭️  SKIPPED:".yellow().bold(), report.message());
        }
        RunOutcome::Failed => {
            println!("{} {}", "❌ FAILED:".red().bold(), report.message());
        }
    }

    println!("{}", "─".repeat(60));
    println!("📊 Run Details:");
    println!("   • Status: {}", report.outcome);
    println!(
        "   • Started: {}",
        report
            .started_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    let seconds = report.duration_ms() as f64 / 1000.0;
    println!("   • Duration: {seconds:.2}s");
    if let Some(decision) = &report.decision {
        println!("   • Countdown: {}", describe_decision(decision));
    }
    println!("   • Stages Completed: {}", report.completed_stages.len());
    if let Some(stage) = report.failed_stage {
        println!("   • Failed Stage: {}", stage.to_string().red());
    }
    if let Some(error) = &report.error {
        println!("{}", "─".repeat(60));
        println!("{}", "Error:".red().bold());
        println!("   {error}");
    }

    println!("{}", "═".repeat(60));
}

pub fn describe_decision(decision: &EligibilityDecision) -> String {
    let verdict = if decision.act_now {
        "act now".green().bold()
    } else {
        "wait".yellow().bold()
    };
    format!(
        "{} remaining, threshold {} → {verdict}",
        decision.remaining, decision.threshold
    )
}
