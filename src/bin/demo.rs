//! Exercises PLAIN and LOGIN end to end against in-process server/client
//! connections — a diagnostic CLI, not a network service, the same role
//! the teacher's small standalone test binary played.

use std::sync::Arc;

use sasl_core::builtin::login::{LoginClientMechanism, LoginServerMechanism};
use sasl_core::builtin::plain::{PlainClientMechanism, PlainServerMechanism};
use sasl_core::callback::CallbackList;
use sasl_core::session::SessionOutcome;
use sasl_core::{client_init, client_new, client_start, client_step};
use sasl_core::{listmech, register_client_mechanism, register_server_mechanism, server_init, server_new, server_start, server_step};

fn run_exchange(mech_hint: &str) -> Result<(), sasl_core::error::SaslError> {
    println!("--- {} ---", mech_hint);

    let server = server_new("imap", "imap.example.com", "", CallbackList::default())?;
    let client = client_new("imap", "imap.example.com", CallbackList::default())?;

    let offered = listmech(&server, None, "", " ", "")?;
    println!("server offers: {}", offered);

    let start = client_start(&client, &offered, &[])?;
    println!("client selected: {}", start.mech_name);

    let client_initial: &[u8] = match &start.outcome {
        SessionOutcome::Continue(token) | SessionOutcome::Ok(token) => token,
        SessionOutcome::Interact(_) => &[],
    };

    let mut server_outcome = server_start(&server, &start.mech_name, client_initial)?;
    loop {
        match server_outcome {
            SessionOutcome::Ok(token) => {
                println!("server: OK (final token {} bytes)", token.len());
                break;
            }
            SessionOutcome::Continue(server_token) => {
                println!("server -> client: {} bytes", server_token.len());
                let client_outcome = client_step(&client, &server_token, &[])?;
                match client_outcome {
                    SessionOutcome::Ok(client_token) => {
                        println!("client: OK ({} bytes to send)", client_token.len());
                        server_outcome = server_step(&server, &client_token)?;
                    }
                    SessionOutcome::Continue(client_token) => {
                        println!("client -> server: {} bytes", client_token.len());
                        server_outcome = server_step(&server, &client_token)?;
                    }
                    SessionOutcome::Interact(prompts) => {
                        println!("client needs interaction for {} prompt(s); demo has none to give", prompts.len());
                        break;
                    }
                }
            }
            SessionOutcome::Interact(_) => unreachable!("server mechanisms never return Interact"),
        }
    }

    println!(
        "server authid: {:?}",
        server.core.out_params.lock().unwrap().authid
    );
    Ok(())
}

fn main() {
    server_init("sasl-core-demo", CallbackList::default()).expect("server_init");
    client_init("sasl-core-demo", CallbackList::default()).expect("client_init");

    register_server_mechanism(Arc::new(PlainServerMechanism::new_in_memory(vec![(
        "alice".to_string(),
        "hunter2".to_string(),
    )])))
    .expect("register PLAIN server mechanism");
    register_client_mechanism(Arc::new(PlainClientMechanism::new("alice", "hunter2")))
        .expect("register PLAIN client mechanism");

    register_server_mechanism(Arc::new(LoginServerMechanism::new_in_memory(vec![(
        "alice".to_string(),
        "hunter2".to_string(),
    )])))
    .expect("register LOGIN server mechanism");
    register_client_mechanism(Arc::new(LoginClientMechanism::new("alice", "hunter2")))
        .expect("register LOGIN client mechanism");

    if let Err(err) = run_exchange("first offered mechanism") {
        eprintln!("exchange failed: {}", err);
        std::process::exit(1);
    }
}
