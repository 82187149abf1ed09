//! A small command-line driver over [`pflow_kinetics`], in the spirit of the
//! teacher's own `examples/hello-world.rs`: build a net in code (or load one
//! from pflow.xyz-compatible JSON), solve it, and print a summary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pflow_kinetics::{Net, Place, RateMap, Transition};

#[derive(Parser)]
#[command(name = "pflow-demo", about = "Simulate a Petri net under mass-action kinetics")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulates the built-in SIR epidemic net and prints the final marking.
    Sir {
        /// Simulated time span.
        #[arg(long, default_value_t = 50.0)]
        duration: f64,
    },
    /// Loads a pflow.xyz-compatible JSON net and validates its structure.
    Validate {
        /// Path to the net's JSON file.
        path: PathBuf,
    },
    /// Loads a pflow.xyz-compatible JSON net and simulates it.
    Run {
        /// Path to the net's JSON file.
        path: PathBuf,
        /// Simulated time span.
        #[arg(long, default_value_t = 10.0)]
        duration: f64,
    },
}

fn sir_net() -> Net {
    let mut net = Net::new();
    net.add_place(Place::new("S", 990.0)).expect("S");
    net.add_place(Place::new("I", 10.0)).expect("I");
    net.add_place(Place::new("R", 0.0)).expect("R");
    net.add_transition(Transition::new("infect")).expect("infect");
    net.add_transition(Transition::new("recover")).expect("recover");
    net.add_arc(pflow_kinetics::NetArc::new("S", "infect", 1.0)).expect("S->infect");
    net.add_arc(pflow_kinetics::NetArc::new("I", "infect", 1.0)).expect("I->infect");
    net.add_arc(pflow_kinetics::NetArc::new("infect", "I", 2.0)).expect("infect->I");
    net.add_arc(pflow_kinetics::NetArc::new("I", "recover", 1.0)).expect("I->recover");
    net.add_arc(pflow_kinetics::NetArc::new("recover", "R", 1.0)).expect("recover->R");
    net
}

fn print_final_state(solution: &pflow_kinetics::Solution) {
    let mut places: Vec<&String> = solution.final_state().keys().collect();
    places.sort();
    for place in places {
        println!("  {place} = {:.4}", solution.final_state()[place]);
    }
    println!("  diagnostic = {:?}", solution.diagnostic());
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Sir { duration } => {
            let net = Arc::new(sir_net());
            let mut rates = RateMap::new();
            rates.insert("infect".to_string(), 0.0003);
            rates.insert("recover".to_string(), 0.1);
            let problem = pflow_kinetics::Problem::from_net_defaults(net.clone(), (0.0, duration), rates)
                .expect("well-formed SIR problem");

            let findings = pflow_kinetics::validate::validate(&net);
            if findings.has_errors() {
                for f in findings.at_least(pflow_kinetics::validate::Severity::Error) {
                    eprintln!("error: {}", f.message);
                }
                std::process::exit(1);
            }

            let solution =
                pflow_kinetics::solve(&problem, pflow_kinetics::Options::default()).expect("solve");
            println!("SIR final state at t={duration}:");
            print_final_state(&solution);
        }
        Command::Validate { path } => {
            let json = std::fs::read_to_string(&path).expect("read net file");
            let net = Net::from_json(&json).expect("parse net");
            let findings = pflow_kinetics::validate::validate(&net);
            for f in findings.iter() {
                println!("[{:?}] {} {}", f.severity, f.category, f.message);
            }
            if findings.has_errors() {
                std::process::exit(1);
            }
        }
        Command::Run { path, duration } => {
            let json = std::fs::read_to_string(&path).expect("read net file");
            let net = Arc::new(Net::from_json(&json).expect("parse net"));
            let problem = pflow_kinetics::Problem::from_net_defaults(
                net,
                (0.0, duration),
                RateMap::new(),
            )
            .expect("well-formed problem");
            let solution =
                pflow_kinetics::solve(&problem, pflow_kinetics::Options::default()).expect("solve");
            println!("final state at t={duration}:");
            print_final_state(&solution);
        }
    }
}
