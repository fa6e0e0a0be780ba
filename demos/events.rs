//! Print every event from a FreeSWITCH event socket until Enter is pressed.
//!
//! ESL_ADDR (default 127.0.0.1:8021) and ESL_PASSWORD (default ClueCon)
//! select the switch. RUST_LOG=debug shows the protocol traffic.

use freeswitch_esl_mux::{Connection, DisconnectHook, EslError, EventFormat, ListenerScope};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), EslError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    let addr = std::env::var("ESL_ADDR").unwrap_or_else(|_| "127.0.0.1:8021".to_string());
    let password = std::env::var("ESL_PASSWORD").unwrap_or_else(|_| "ClueCon".to_string());

    let on_disconnect: DisconnectHook = Box::new(|reason| {
        println!("Event socket disconnected: {}", reason);
    });
    let conn = Connection::dial(&addr, &password, Some(on_disconnect)).await?;
    info!("connected to {}", addr);

    let listener = conn.register_event_listener(ListenerScope::All, |event| {
        println!(
            "{} {}",
            event
                .event_name()
                .unwrap_or("<unnamed>"),
            event
                .unique_id()
                .unwrap_or("")
        );
    });
    conn.enable_events(EventFormat::Plain)
        .await?;

    println!("Press Enter to quit");
    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        _ = stdin.read_line(&mut line) => {}
        reason = conn.closed() => println!("closed by switch: {}", reason),
    }

    conn.remove_event_listener(&ListenerScope::All, listener);
    conn.exit_and_close()
        .await;
    if conn.dropped_event_count() > 0 {
        println!("{} events dropped", conn.dropped_event_count());
    }
    Ok(())
}
