use clap::Parser;
use training::util::{init_tracing, run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = TrainArgs::parse();
    let report = run_train(args)?;
    if let Some(last) = report.epochs.last() {
        println!(
            "final epoch {}: loss {:.4}{}",
            last.epoch,
            last.train_loss,
            last.val
                .map(|v| format!(", val dice {:.4}, val accuracy {:.4}", v.dice, v.accuracy))
                .unwrap_or_default()
        );
    }
    Ok(())
}
