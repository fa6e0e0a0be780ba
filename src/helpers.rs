//! Call-control shortcuts on [`Connection`].
//!
//! Each blocking helper sets `event-lock`, so the switch finishes the
//! application before running the next queued one; the `_async` twin leaves
//! it off. Every helper turns a `-ERR` reply into an error.

use std::fmt::Display;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::{
    call::{Execute, Hangup, Set},
    command::{Api, BgApi, Linger},
    connection::Connection,
    error::{EslError, EslResult},
    event::EslEventType,
    headers::EventHeader,
    registry::{ListenerId, ListenerScope},
    response::RawResponse,
};

/// Removes a listener when the waiting future finishes or is dropped.
struct ListenerGuard<'a> {
    conn: &'a Connection,
    scope: ListenerScope,
    id: ListenerId,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.conn
            .remove_event_listener(&self.scope, self.id);
    }
}

impl Connection {
    async fn run_app(
        &self,
        app: &str,
        uuid: &str,
        args: &str,
        times: u32,
        sync: bool,
    ) -> EslResult<RawResponse> {
        let execute = Execute {
            uuid: uuid.to_string(),
            app_name: app.to_string(),
            app_args: args.to_string(),
            loops: times,
            sync,
            ..Default::default()
        };
        self.send_command(&execute)
            .await?
            .into_result()
    }

    /// Run a dialplan application on a channel.
    pub async fn execute(&self, uuid: &str, app: &str, args: &str) -> EslResult<RawResponse> {
        self.run_app(app, uuid, args, 1, true)
            .await
    }

    pub async fn execute_async(
        &self,
        uuid: &str,
        app: &str,
        args: &str,
    ) -> EslResult<RawResponse> {
        self.run_app(app, uuid, args, 1, false)
            .await
    }

    pub async fn answer(&self, uuid: &str) -> EslResult<RawResponse> {
        self.run_app("answer", uuid, "", 1, true)
            .await
    }

    pub async fn answer_async(&self, uuid: &str) -> EslResult<RawResponse> {
        self.run_app("answer", uuid, "", 1, false)
            .await
    }

    /// Hang up with a cause such as `NORMAL_CLEARING`.
    pub async fn hangup(&self, uuid: &str, cause: &str) -> EslResult<RawResponse> {
        self.hangup_with(uuid, cause, true)
            .await
    }

    pub async fn hangup_async(&self, uuid: &str, cause: &str) -> EslResult<RawResponse> {
        self.hangup_with(uuid, cause, false)
            .await
    }

    async fn hangup_with(&self, uuid: &str, cause: &str, sync: bool) -> EslResult<RawResponse> {
        let hangup = Hangup {
            uuid: uuid.to_string(),
            cause: cause.to_string(),
            sync,
            sync_pri: false,
        };
        self.send_command(&hangup)
            .await?
            .into_result()
    }

    /// Play a file `times` times.
    pub async fn playback(&self, uuid: &str, file: &str, times: u32) -> EslResult<RawResponse> {
        self.run_app("playback", uuid, file, times, true)
            .await
    }

    pub async fn playback_async(
        &self,
        uuid: &str,
        file: &str,
        times: u32,
    ) -> EslResult<RawResponse> {
        self.run_app("playback", uuid, file, times, false)
            .await
    }

    /// `say` with its full argument string, e.g. `en number pronounced 42`.
    pub async fn say(&self, uuid: &str, args: &str, times: u32) -> EslResult<RawResponse> {
        self.run_app("say", uuid, args, times, true)
            .await
    }

    pub async fn say_async(&self, uuid: &str, args: &str, times: u32) -> EslResult<RawResponse> {
        self.run_app("say", uuid, args, times, false)
            .await
    }

    /// Text to speech, e.g. `flite|kal|Hello`.
    pub async fn speak(&self, uuid: &str, args: &str, times: u32) -> EslResult<RawResponse> {
        self.run_app("speak", uuid, args, times, true)
            .await
    }

    pub async fn speak_async(&self, uuid: &str, args: &str, times: u32) -> EslResult<RawResponse> {
        self.run_app("speak", uuid, args, times, false)
            .await
    }

    /// Play a phrase macro.
    pub async fn phrase(&self, uuid: &str, macro_name: &str, times: u32) -> EslResult<RawResponse> {
        self.run_app("phrase", uuid, macro_name, times, true)
            .await
    }

    pub async fn phrase_async(
        &self,
        uuid: &str,
        macro_name: &str,
        times: u32,
    ) -> EslResult<RawResponse> {
        self.run_app("phrase", uuid, macro_name, times, false)
            .await
    }

    /// Play a phrase macro with one argument, sent as `macro,argument`.
    pub async fn phrase_with_arg(
        &self,
        uuid: &str,
        macro_name: &str,
        argument: impl Display,
        times: u32,
    ) -> EslResult<RawResponse> {
        let args = format!("{},{}", macro_name, argument);
        self.run_app("phrase", uuid, &args, times, true)
            .await
    }

    pub async fn phrase_with_arg_async(
        &self,
        uuid: &str,
        macro_name: &str,
        argument: impl Display,
        times: u32,
    ) -> EslResult<RawResponse> {
        let args = format!("{},{}", macro_name, argument);
        self.run_app("phrase", uuid, &args, times, false)
            .await
    }

    /// Put the channel into a conference, e.g. `3000@default`.
    pub async fn conference(&self, uuid: &str, args: &str) -> EslResult<RawResponse> {
        self.run_app("conference", uuid, args, 1, true)
            .await
    }

    pub async fn conference_async(&self, uuid: &str, args: &str) -> EslResult<RawResponse> {
        self.run_app("conference", uuid, args, 1, false)
            .await
    }

    /// Set a channel variable.
    pub async fn set(&self, uuid: &str, key: &str, value: &str) -> EslResult<RawResponse> {
        self.set_with(uuid, key, value, true)
            .await
    }

    pub async fn set_async(&self, uuid: &str, key: &str, value: &str) -> EslResult<RawResponse> {
        self.set_with(uuid, key, value, false)
            .await
    }

    async fn set_with(
        &self,
        uuid: &str,
        key: &str,
        value: &str,
        sync: bool,
    ) -> EslResult<RawResponse> {
        let set = Set {
            uuid: uuid.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            sync,
            sync_pri: false,
        };
        self.send_command(&set)
            .await?
            .into_result()
    }

    /// Keep the socket open after hangup (`linger`) or stop doing so (`nolinger`).
    pub async fn linger(&self, enabled: bool, duration: Option<Duration>) -> EslResult<RawResponse> {
        self.send_command(&Linger { enabled, duration })
            .await?
            .into_result()
    }

    /// Send an API command (blocking)
    ///
    /// ```no_run
    /// # async fn example(conn: &freeswitch_esl_mux::Connection) -> Result<(), freeswitch_esl_mux::EslError> {
    /// let response = conn.api("status").await?;
    /// println!("{}", response.body_string());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn api(&self, command: &str) -> EslResult<RawResponse> {
        let api = Api {
            command: command.to_string(),
        };
        self.send_command(&api)
            .await?
            .into_result()
    }

    /// Run an API command in the background.
    ///
    /// A fresh `Job-UUID` is sent with the command; the switch reports the
    /// outcome in a `BACKGROUND_JOB` event carrying the same id, which a
    /// listener scoped to [`RawResponse::job_uuid`] receives.
    pub async fn bgapi(&self, command: &str) -> EslResult<RawResponse> {
        let bgapi = BgApi {
            command: command.to_string(),
            job_uuid: Some(
                Uuid::new_v4()
                    .to_string(),
            ),
        };
        self.send_command(&bgapi)
            .await?
            .into_result()
    }

    /// Wait for the next DTMF digit on a channel. Events must be enabled.
    pub async fn wait_for_dtmf(&self, uuid: &str) -> EslResult<char> {
        self.wait_for_dtmf_cancellable(uuid, &CancellationToken::new())
            .await
    }

    pub async fn wait_for_dtmf_cancellable(
        &self,
        uuid: &str,
        cancel: &CancellationToken,
    ) -> EslResult<char> {
        let (tx, mut rx) = mpsc::channel::<Option<char>>(1);
        let scope = ListenerScope::uuid(uuid);
        let id = self.register_event_listener(scope.clone(), move |event| {
            if event.is_event_type(EslEventType::Dtmf) {
                let digit = event
                    .dtmf_digit()
                    .and_then(|d| {
                        d.chars()
                            .next()
                    });
                // only the first digit matters; later ones find the slot taken
                let _ = tx.try_send(digit);
            }
        });
        let _guard = ListenerGuard {
            conn: self,
            scope,
            id,
        };

        tokio::select! {
            digit = rx.recv() => match digit {
                Some(Some(digit)) => Ok(digit),
                Some(None) => Err(EslError::MissingHeader {
                    header: EventHeader::DtmfDigit.as_str(),
                }),
                None => Err(EslError::ConnectionClosed),
            },
            _ = cancel.cancelled() => Err(EslError::Cancelled),
        }
    }

    /// Log every event at debug level. Returns the id for [`debug_off`](Self::debug_off).
    pub fn debug_events(&self) -> ListenerId {
        self.register_event_listener(ListenerScope::All, |event| {
            debug!(
                "EventLog: {}",
                event
                    .to_plain_format()
                    .trim_end()
            );
        })
    }

    pub fn debug_off(&self, id: ListenerId) {
        self.remove_event_listener(&ListenerScope::All, id);
    }
}
