//! A tiny IVR served to the `socket` dialplan application.
//!
//! Point a dialplan extension at it:
//!
//! ```xml
//! <action application="socket" data="127.0.0.1:8084 async full"/>
//! ```
//!
//! Each call is answered, asked for a digit, told the digit back, and hung up.

use std::time::Duration;

use freeswitch_esl_mux::{
    CancellationToken, Connection, EslError, EslResult, EventFormat, InboundServer, RawResponse,
};
use tracing::{info, warn};

const DIGIT_TIMEOUT: Duration = Duration::from_secs(10);

async fn run_call(conn: &Connection, channel: &RawResponse) -> EslResult<()> {
    let uuid = channel
        .channel_uuid()
        .ok_or(EslError::MissingHeader { header: "Unique-ID" })?;
    let caller = channel
        .channel_data()
        .get("Caller-Caller-ID-Number")
        .unwrap_or("unknown")
        .to_string();
    info!("call {} from {}", uuid, caller);

    conn.enable_events(EventFormat::Plain)
        .await?;
    conn.linger(true, None)
        .await?;
    conn.answer(uuid)
        .await?;
    conn.playback(uuid, "ivr/ivr-please_enter_extension_followed_by_pound.wav", 1)
        .await?;

    let token = CancellationToken::new();
    let deadline = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DIGIT_TIMEOUT).await;
            token.cancel();
        })
    };
    let digit = conn
        .wait_for_dtmf_cancellable(uuid, &token)
        .await;
    deadline.abort();

    match digit {
        Ok(digit) => {
            info!("call {} pressed {}", uuid, digit);
            conn.say(uuid, &format!("en number pronounced {}", digit), 1)
                .await?;
        }
        Err(EslError::Cancelled) => {
            conn.phrase_with_arg(uuid, "voicemail_goodbye", "", 1)
                .await?;
        }
        Err(e) => return Err(e),
    }

    conn.hangup(uuid, "NORMAL_CLEARING")
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), EslError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    let bind = std::env::var("IVR_BIND").unwrap_or_else(|_| "127.0.0.1:8084".to_string());
    let server = InboundServer::listen(&bind, |conn, channel| async move {
        if let Err(e) = run_call(&conn, &channel).await {
            warn!("call ended with error: {}", e);
        }
    })
    .await?;
    info!("IVR listening on {}", server.local_addr());

    tokio::signal::ctrl_c()
        .await?;
    server
        .shutdown()
        .await;
    Ok(())
}
