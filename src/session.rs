//! Per-account session lifecycle
//!
//! Each session loops over check cycles: re-resolve the interface (auto
//! mode), probe the keep-alive URL, and log in when the portal intercepts
//! the probe. Failed attempts back off by `retry_time`; after `retry_max`
//! consecutive failures the session pauses for the configured cooldown.
//! Every cycle that does not fail waits one `keep_alive` interval.
//!
//! Shutdown is observed before each cycle, during every sleep, and between
//! the login steps. Once seen, the session sends a single logout and stops.

use crate::config::{AccountConfig, FallbackConfig};
use crate::iface::{InterfaceError, InterfaceProbe, InterfaceResolver, InterfaceSpec};
use crate::models::{InterfaceBinding, SessionEvent, SessionPhase};
use crate::parser;
use crate::portal::{
    ActionInfoRequest, LoginRequest, LogoutRequest, Outbound, PortalApi, PortalCheck, PortalError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

const PORTAL_TYPE: &str = "0";
const CLEAR_OPERATOR: &str = "0";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("[{account}] interface resolution failed: {source}")]
    Interface {
        account: String,
        #[source]
        source: InterfaceError,
    },
}

/// Why a login attempt did not go through
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Portal(#[from] PortalError),

    #[error("portal rejected login (code {code}): {message}")]
    Rejected { code: String, message: String },
}

/// Sending half of the shutdown broadcast
pub struct ShutdownTrigger(watch::Sender<bool>);

/// Receiving half; cloned into every session, observable any number of times
#[derive(Clone)]
pub struct Shutdown(watch::Receiver<bool>);

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), Shutdown(rx))
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown(self.0.subscribe())
    }
}

impl Shutdown {
    pub fn is_signaled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown is signaled. A dropped trigger counts as a
    /// signal.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }

    /// Sleep for `duration` unless shutdown arrives first. Returns `true`
    /// when woken by shutdown.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.wait() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

/// Collaborators shared by all sessions
pub struct SessionEnv<A, P> {
    pub portal: Arc<A>,
    pub resolver: Arc<InterfaceResolver<P>>,
    pub fallback: FallbackConfig,
    pub pause_cooldown: Duration,
    pub events: broadcast::Sender<SessionEvent>,
}

impl<A, P> Clone for SessionEnv<A, P> {
    fn clone(&self) -> Self {
        Self {
            portal: Arc::clone(&self.portal),
            resolver: Arc::clone(&self.resolver),
            fallback: self.fallback.clone(),
            pause_cooldown: self.pause_cooldown,
            events: self.events.clone(),
        }
    }
}

/// Values assigned by the last successful login, kept for logout
#[derive(Debug, Clone)]
struct LoginRecord {
    host: String,
    wlanac_ip: String,
    wlanuserip: String,
    wlanacname: String,
    mac: String,
    version: i64,
    group_id: Option<i64>,
    user_id: Option<String>,
}

enum Cycle {
    Online,
    LoggedIn,
    Failed,
    /// Shutdown was observed part way through a login
    Aborted,
}

pub struct Session<A, P> {
    key: String,
    account: AccountConfig,
    spec: InterfaceSpec,
    env: SessionEnv<A, P>,
    shutdown: Shutdown,
    phase: SessionPhase,
    failures: u32,
    binding: Option<InterfaceBinding>,
    last_login: Option<LoginRecord>,
}

impl<A: PortalApi, P: InterfaceProbe> Session<A, P> {
    pub fn new(account: AccountConfig, env: SessionEnv<A, P>, shutdown: Shutdown) -> Self {
        Self {
            key: account.key(),
            spec: InterfaceSpec::parse(&account.interface),
            account,
            env,
            shutdown,
            phase: SessionPhase::Starting,
            failures: 0,
            binding: None,
            last_login: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run until shutdown, then log out. Only an interface resolution
    /// failure ends the session early, without logging out.
    pub async fn run(mut self) -> Result<(), SessionError> {
        tracing::info!("[{}] Starting session", self.key);
        self.emit();

        loop {
            if self.shutdown.is_signaled() {
                break;
            }

            let interrupted = match self.cycle().await? {
                Cycle::Online | Cycle::LoggedIn => {
                    let keep_alive = Duration::from_secs(self.account.keep_alive);
                    self.shutdown.sleep(keep_alive).await
                }
                Cycle::Failed => self.back_off().await,
                Cycle::Aborted => true,
            };
            if interrupted {
                break;
            }
        }

        tracing::debug!("[{}] Quit signal received", self.key);
        self.logout().await;
        self.set_phase(SessionPhase::Stopped);
        Ok(())
    }

    /// A single check cycle with no logout afterwards. Returns `false` when
    /// a login was needed and failed.
    pub async fn run_once(mut self) -> Result<bool, SessionError> {
        self.emit();
        let ok = !matches!(self.cycle().await?, Cycle::Failed);
        self.set_phase(SessionPhase::Stopped);
        Ok(ok)
    }

    /// Log out with whatever is known (normally just the fallbacks) and stop.
    pub async fn logout_only(mut self) -> Result<(), SessionError> {
        self.emit();
        self.refresh_binding()?;
        self.logout().await;
        self.set_phase(SessionPhase::Stopped);
        Ok(())
    }

    async fn cycle(&mut self) -> Result<Cycle, SessionError> {
        let binding = self.refresh_binding()?;
        let user_agent = self.account.user_agent.clone();
        let out = Outbound {
            binding: &binding,
            user_agent: &user_agent,
        };

        tracing::debug!("[{}] Checking portal if login is required", self.key);
        let location = match self
            .env
            .portal
            .check_portal(out, &self.account.keep_alive_link)
            .await
        {
            PortalCheck::Online => {
                tracing::debug!("[{}] No login required", self.key);
                if self.phase == SessionPhase::Starting {
                    self.set_phase(SessionPhase::NotLoggedIn);
                }
                return Ok(Cycle::Online);
            }
            PortalCheck::LoginRequired(location) => location,
        };

        if self.shutdown.is_signaled() {
            return Ok(Cycle::Aborted);
        }

        tracing::info!("[{}] Login required", self.key);
        tracing::debug!("[{}] Redirect link: {}", self.key, location);
        self.set_phase(SessionPhase::LoggingIn);

        match self.attempt_login(out, &location).await {
            Ok(true) => {
                self.failures = 0;
                self.set_phase(SessionPhase::LoggedIn);
                tracing::info!("[{}] Login successfully!", self.key);
                Ok(Cycle::LoggedIn)
            }
            Ok(false) => {
                self.set_phase(SessionPhase::NotLoggedIn);
                Ok(Cycle::Aborted)
            }
            Err(e) => {
                self.failures += 1;
                if self.account.retry_max == 0 {
                    tracing::error!("[{}] Login failed (attempt {}): {}", self.key, self.failures, e);
                } else {
                    tracing::error!(
                        "[{}] Login failed (attempt {}/{}): {}",
                        self.key,
                        self.failures,
                        self.account.retry_max,
                        e
                    );
                }
                self.set_phase(SessionPhase::NotLoggedIn);
                Ok(Cycle::Failed)
            }
        }
    }

    /// Parse the redirect, fetch the portal parameters and submit the
    /// credentials. `Ok(false)` means shutdown arrived before the login
    /// request was sent.
    async fn attempt_login(
        &mut self,
        out: Outbound<'_>,
        location: &str,
    ) -> Result<bool, AttemptError> {
        let params = parser::parse_redirect(location)?;

        let action = self
            .env
            .portal
            .fetch_action_info(
                out,
                &ActionInfoRequest {
                    host: params.host.clone(),
                    wlanuserip: params.wlanuserip.clone(),
                    wlanacname: params.wlanacname.clone(),
                    mac: params.mac.clone(),
                    vlan: params.vlan.clone(),
                    hostname: params.hostname.clone(),
                    rand: params.rand.clone(),
                },
            )
            .await?;

        if self.shutdown.is_signaled() {
            tracing::debug!("[{}] Quit signal received, skipping login", self.key);
            return Ok(false);
        }

        let result = self
            .env
            .portal
            .login(
                out,
                &LoginRequest {
                    host: params.host.clone(),
                    username: self.account.username.clone(),
                    password: self.account.password.clone(),
                    wlanuserip: params.wlanuserip.clone(),
                    wlanacname: params.wlanacname.clone(),
                    wlanac_ip: action.server_ip.clone(),
                    vlan: params.vlan.clone(),
                    mac: params.mac.clone(),
                    version: action.version,
                    page_id: action.page_id,
                    timestamp: action.timestamp,
                    uuid: action.uuid.clone(),
                    portal_type: PORTAL_TYPE.to_string(),
                    hostname: params.hostname.clone(),
                    rand: params.rand.clone(),
                },
            )
            .await?;

        if !result.is_success() {
            return Err(AttemptError::Rejected {
                code: result.code,
                message: result.message,
            });
        }

        self.last_login = Some(LoginRecord {
            host: params.host,
            wlanac_ip: action.server_ip,
            wlanuserip: params.wlanuserip,
            wlanacname: params.wlanacname,
            mac: params.mac,
            version: action.version,
            group_id: result.group_id,
            user_id: result.user_id,
        });
        Ok(true)
    }

    /// Wait after a failed attempt. Returns `true` when woken by shutdown.
    async fn back_off(&mut self) -> bool {
        let retry_max = self.account.retry_max;
        if retry_max != 0 && self.failures >= retry_max {
            tracing::error!(
                "[{}] Reached max retries, pausing for {}s",
                self.key,
                self.env.pause_cooldown.as_secs()
            );
            self.set_phase(SessionPhase::Paused);
            if self.shutdown.sleep(self.env.pause_cooldown).await {
                return true;
            }
            self.failures = 0;
            self.set_phase(SessionPhase::NotLoggedIn);
            tracing::info!("[{}] Pause over, resuming", self.key);
            false
        } else {
            let retry_time = Duration::from_secs(self.account.retry_time);
            self.shutdown.sleep(retry_time).await
        }
    }

    async fn logout(&mut self) {
        self.set_phase(SessionPhase::LoggingOut);
        tracing::info!("[{}] Logging out...", self.key);

        let binding = match self.binding.clone() {
            Some(binding) => binding,
            None => match self.env.resolver.resolve(&self.spec) {
                Ok(binding) => binding,
                Err(e) => {
                    tracing::error!("[{}] Logout failed: {}", self.key, e);
                    return;
                }
            },
        };

        let req = self.logout_request(&binding);
        let out = Outbound {
            binding: &binding,
            user_agent: &self.account.user_agent,
        };
        match self.env.portal.logout(out, &req).await {
            Err(e) => tracing::error!("[{}] Logout failed: {}", self.key, e),
            Ok(res) if !res.is_success() => {
                tracing::error!("[{}] Logout failed: {}", self.key, res.message)
            }
            Ok(_) => tracing::info!("[{}] Logged out successfully.", self.key),
        }
    }

    /// Logout parameters: the last successful login's values where known,
    /// the configured fallbacks otherwise.
    fn logout_request(&self, binding: &InterfaceBinding) -> LogoutRequest {
        let fb = &self.env.fallback;
        let rec = self.last_login.as_ref();
        let fallback_user = format!("{}@{}", self.account.username, fb.user_suffix);
        let bound_ip = binding.ip.to_string();

        LogoutRequest {
            host: known_or(rec.map(|r| r.host.as_str()), &fb.login_host),
            wlanac_ip: known_or(rec.map(|r| r.wlanac_ip.as_str()), &fb.wlanac_ip),
            wlanuserip: known_or(rec.map(|r| r.wlanuserip.as_str()), &bound_ip),
            wlanacname: known_or(rec.map(|r| r.wlanacname.as_str()), &fb.wlanacname),
            version: rec
                .map(|r| r.version)
                .filter(|v| *v != 0)
                .unwrap_or(fb.portal_version),
            portal_type: PORTAL_TYPE.to_string(),
            user_id: known_or(rec.and_then(|r| r.user_id.as_deref()), &fallback_user),
            mac: known_or(rec.map(|r| r.mac.as_str()), &binding.mac),
            group_id: rec.and_then(|r| r.group_id).unwrap_or(fb.group_id),
            clear_operator: CLEAR_OPERATOR.to_string(),
        }
    }

    /// Resolve the binding on the first cycle, and on every cycle in auto
    /// mode. A failure here ends the session.
    fn refresh_binding(&mut self) -> Result<InterfaceBinding, SessionError> {
        if let Some(binding) = &self.binding {
            if !self.spec.is_auto() {
                return Ok(binding.clone());
            }
        }

        let binding = match self.env.resolver.resolve(&self.spec) {
            Ok(binding) => binding,
            Err(source) => {
                tracing::error!("[{}] Error resolving interface: {}", self.key, source);
                self.set_phase(SessionPhase::Stopped);
                return Err(SessionError::Interface {
                    account: self.key.clone(),
                    source,
                });
            }
        };

        match &self.binding {
            None => tracing::info!("[{}] Use interface {} to send request", self.key, binding),
            Some(prev) if prev != &binding => {
                tracing::info!("[{}] Interface changed to {}", self.key, binding)
            }
            Some(_) => {}
        }
        self.binding = Some(binding.clone());
        Ok(binding)
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.emit();
        }
    }

    fn emit(&self) {
        let _ = self.env.events.send(SessionEvent {
            account: self.key.clone(),
            phase: self.phase,
        });
    }
}

/// Use `value` unless it is missing or empty
fn known_or(value: Option<&str>, fallback: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::iface::tests::{iface, FakeProbe};
    use crate::models::{LoginResult, PortalActionInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    const REDIRECT: &str = "http://10.20.16.5/portalScript.do?wlanuserip=10.0.0.5&wlanacname=AC1&mac=AA:BB:CC:DD:EE:FF&vlan=1&hostname=host1&rand=abc123";

    #[derive(Default)]
    pub(crate) struct FakePortal {
        pub needs_login: AtomicBool,
        pub redirect: Mutex<Option<String>>,
        pub login_response: Mutex<LoginResult>,
        pub stop_on_fetch: Mutex<Option<ShutdownTrigger>>,
        pub checks: Mutex<Vec<InterfaceBinding>>,
        pub logins: Mutex<Vec<LoginRequest>>,
        pub logouts: Mutex<Vec<LogoutRequest>>,
        pub fetches: AtomicUsize,
    }

    impl FakePortal {
        pub fn rejecting() -> Self {
            let portal = FakePortal::default();
            portal.needs_login.store(true, Ordering::SeqCst);
            *portal.login_response.lock().unwrap() =
                serde_json::from_str(r#"{"code":"1","message":"bad password"}"#).unwrap();
            portal
        }

        pub fn accepting() -> Self {
            let portal = FakePortal::default();
            portal.needs_login.store(true, Ordering::SeqCst);
            *portal.login_response.lock().unwrap() =
                serde_json::from_str(r#"{"code":"0","groupId":7,"userId":"u1"}"#).unwrap();
            portal
        }

        pub fn login_count(&self) -> usize {
            self.logins.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PortalApi for FakePortal {
        async fn check_portal(&self, out: Outbound<'_>, _probe_url: &str) -> PortalCheck {
            self.checks.lock().unwrap().push(out.binding.clone());
            if self.needs_login.load(Ordering::SeqCst) {
                let redirect = self.redirect.lock().unwrap().clone();
                PortalCheck::LoginRequired(redirect.unwrap_or_else(|| REDIRECT.to_string()))
            } else {
                PortalCheck::Online
            }
        }

        async fn fetch_action_info(
            &self,
            _out: Outbound<'_>,
            _req: &ActionInfoRequest,
        ) -> Result<PortalActionInfo, PortalError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(trigger) = self.stop_on_fetch.lock().unwrap().as_ref() {
                trigger.trigger();
            }
            Ok(PortalActionInfo {
                server_ip: "10.20.16.9".to_string(),
                version: 4,
                page_id: 3,
                timestamp: 42,
                uuid: "uuid".to_string(),
            })
        }

        async fn login(
            &self,
            _out: Outbound<'_>,
            req: &LoginRequest,
        ) -> Result<LoginResult, PortalError> {
            self.logins.lock().unwrap().push(req.clone());
            Ok(self.login_response.lock().unwrap().clone())
        }

        async fn logout(
            &self,
            _out: Outbound<'_>,
            req: &LogoutRequest,
        ) -> Result<LoginResult, PortalError> {
            self.logouts.lock().unwrap().push(req.clone());
            Ok(serde_json::from_str(r#"{"code":"0"}"#).unwrap())
        }
    }

    pub(crate) fn account(interface: &str, retry_max: u32) -> AccountConfig {
        AccountConfig {
            username: "alice".to_string(),
            password: "secret".to_string(),
            interface: interface.to_string(),
            user_agent: "test-agent".to_string(),
            keep_alive: 30,
            keep_alive_link: "http://3.3.3.3".to_string(),
            retry_max,
            retry_time: 5,
        }
    }

    pub(crate) fn probe() -> FakeProbe {
        FakeProbe::new(
            vec![
                iface("lo", &["127.0.0.1"], None),
                iface("eth0", &["10.0.0.5"], Some("aa:bb:cc:dd:ee:01")),
                iface("wlan0", &["192.168.1.20"], Some("aa:bb:cc:dd:ee:02")),
            ],
            Some("eth0"),
        )
    }

    struct Harness {
        portal: Arc<FakePortal>,
        resolver: Arc<InterfaceResolver<FakeProbe>>,
        events: broadcast::Receiver<SessionEvent>,
        trigger: ShutdownTrigger,
        session: Session<FakePortal, FakeProbe>,
    }

    fn harness(portal: FakePortal, account: AccountConfig) -> Harness {
        let portal = Arc::new(portal);
        let resolver = Arc::new(InterfaceResolver::new(probe()));
        let (events_tx, events) = broadcast::channel(1024);
        let (trigger, shutdown) = shutdown_channel();
        let env = SessionEnv {
            portal: portal.clone(),
            resolver: resolver.clone(),
            fallback: FallbackConfig::default(),
            pause_cooldown: Duration::from_secs(600),
            events: events_tx,
        };
        Harness {
            portal,
            resolver,
            events,
            trigger,
            session: Session::new(account, env, shutdown),
        }
    }

    fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionPhase> {
        let mut phases = Vec::new();
        while let Ok(event) = events.try_recv() {
            phases.push(event.phase);
        }
        phases
    }

    async fn wait_for(events: &mut broadcast::Receiver<SessionEvent>, phase: SessionPhase) {
        loop {
            if events.recv().await.unwrap().phase == phase {
                return;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_after_retry_max_failures() {
        let Harness {
            portal,
            mut events,
            trigger,
            session,
            ..
        } = harness(FakePortal::rejecting(), account("", 3));
        let handle = tokio::spawn(session.run());

        wait_for(&mut events, SessionPhase::Paused).await;
        assert_eq!(portal.login_count(), 3);

        // No attempt for the whole cooldown
        tokio::time::sleep(Duration::from_secs(599)).await;
        assert_eq!(portal.login_count(), 3);

        // Cooldown over: counter reset, attempts resume
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(portal.login_count(), 4);

        trigger.trigger();
        handle.await.unwrap().unwrap();
        assert_eq!(portal.logouts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_paused_logs_out_once() {
        let Harness {
            portal,
            mut events,
            trigger,
            session,
            ..
        } = harness(FakePortal::rejecting(), account("", 3));
        let start = Instant::now();
        let handle = tokio::spawn(session.run());

        wait_for(&mut events, SessionPhase::Paused).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        trigger.trigger();
        handle.await.unwrap().unwrap();

        assert!(start.elapsed() < Duration::from_secs(120));
        assert_eq!(portal.login_count(), 3);
        assert_eq!(portal.logouts.lock().unwrap().len(), 1);
        assert_eq!(
            drain(&mut events),
            vec![SessionPhase::LoggingOut, SessionPhase::Stopped]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_portal_redirect_counts_as_failure() {
        let portal = FakePortal::accepting();
        *portal.redirect.lock().unwrap() =
            Some("http://10.20.16.5:99999/portalScript.do?rand=1".to_string());
        let Harness {
            portal,
            mut events,
            trigger,
            session,
            ..
        } = harness(portal, account("", 2));
        let handle = tokio::spawn(session.run());

        wait_for(&mut events, SessionPhase::Paused).await;
        assert_eq!(portal.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(portal.login_count(), 0);
        assert_eq!(portal.checks.lock().unwrap().len(), 2);

        trigger.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_retries_never_pause() {
        let Harness {
            portal,
            mut events,
            trigger,
            session,
            ..
        } = harness(FakePortal::rejecting(), account("", 0));
        let handle = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_secs(5 * 30)).await;
        assert!(portal.login_count() >= 25);
        assert!(!drain(&mut events).contains(&SessionPhase::Paused));

        trigger.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep_and_logs_out_once() {
        let Harness {
            portal,
            mut events,
            trigger,
            session,
            ..
        } = harness(FakePortal::default(), account("", 3));
        let start = Instant::now();
        let handle = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.trigger();
        handle.await.unwrap().unwrap();

        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(portal.login_count(), 0);

        let logouts = portal.logouts.lock().unwrap();
        assert_eq!(logouts.len(), 1);
        assert_eq!(
            logouts[0],
            LogoutRequest {
                host: "10.20.16.5".to_string(),
                wlanac_ip: "10.20.16.2".to_string(),
                wlanuserip: "10.0.0.5".to_string(),
                wlanacname: "NFV-BASE-01".to_string(),
                version: 4,
                portal_type: "0".to_string(),
                user_id: "alice@SSGSXY".to_string(),
                mac: "aa:bb:cc:dd:ee:01".to_string(),
                group_id: 19,
                clear_operator: "0".to_string(),
            }
        );

        assert_eq!(
            drain(&mut events),
            vec![
                SessionPhase::Starting,
                SessionPhase::NotLoggedIn,
                SessionPhase::LoggingOut,
                SessionPhase::Stopped,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_uses_values_from_successful_login() {
        let Harness {
            portal,
            mut events,
            trigger,
            session,
            ..
        } = harness(FakePortal::accepting(), account("", 3));
        let handle = tokio::spawn(session.run());

        wait_for(&mut events, SessionPhase::LoggedIn).await;
        trigger.trigger();
        handle.await.unwrap().unwrap();

        let logins = portal.logins.lock().unwrap();
        assert_eq!(logins[0].host, "10.20.16.5");
        assert_eq!(logins[0].wlanac_ip, "10.20.16.9");
        assert_eq!(logins[0].mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(logins[0].uuid, "uuid");

        let logouts = portal.logouts.lock().unwrap();
        assert_eq!(logouts.len(), 1);
        assert_eq!(logouts[0].group_id, 7);
        assert_eq!(logouts[0].user_id, "u1");
        assert_eq!(logouts[0].wlanac_ip, "10.20.16.9");
        assert_eq!(logouts[0].wlanuserip, "10.0.0.5");
        assert_eq!(logouts[0].wlanacname, "AC1");
        assert_eq!(logouts[0].mac, "AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_keeps_previous_login_for_logout() {
        let Harness {
            portal,
            mut events,
            trigger,
            session,
            ..
        } = harness(FakePortal::accepting(), account("", 0));
        let handle = tokio::spawn(session.run());

        wait_for(&mut events, SessionPhase::LoggedIn).await;
        *portal.login_response.lock().unwrap() =
            serde_json::from_str(r#"{"code":"1","message":"bad password","groupId":99}"#).unwrap();
        wait_for(&mut events, SessionPhase::NotLoggedIn).await;

        trigger.trigger();
        handle.await.unwrap().unwrap();

        let logouts = portal.logouts.lock().unwrap();
        assert_eq!(logouts[0].group_id, 7);
        assert_eq!(logouts[0].user_id, "u1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_login_started_after_shutdown() {
        let Harness {
            portal,
            trigger,
            session,
            ..
        } = harness(FakePortal::accepting(), account("", 3));
        *portal.stop_on_fetch.lock().unwrap() = Some(trigger);

        session.run().await.unwrap();

        assert_eq!(portal.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(portal.login_count(), 0);
        assert_eq!(portal.logouts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_cycle() {
        let Harness {
            portal,
            trigger,
            session,
            ..
        } = harness(FakePortal::accepting(), account("", 3));
        trigger.trigger();

        session.run().await.unwrap();

        assert!(portal.checks.lock().unwrap().is_empty());
        assert_eq!(portal.logouts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_mode_follows_default_route() {
        let Harness {
            portal,
            resolver,
            trigger,
            session,
            ..
        } = harness(FakePortal::default(), account("", 3));
        let handle = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_secs(45)).await;
        resolver_probe(&resolver).set_default("wlan0");
        tokio::time::sleep(Duration::from_secs(30)).await;
        trigger.trigger();
        handle.await.unwrap().unwrap();

        let checks = portal.checks.lock().unwrap();
        assert_eq!(checks.len(), 3);
        assert_eq!(checks[0].name, "eth0");
        assert_eq!(checks[1].name, "eth0");
        assert_eq!(checks[2].name, "wlan0");
        assert_eq!(resolver_probe(&resolver).calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinned_interface_never_changes() {
        let Harness {
            portal,
            resolver,
            trigger,
            session,
            ..
        } = harness(FakePortal::default(), account("eth0", 3));
        let handle = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_secs(45)).await;
        resolver_probe(&resolver).set_default("wlan0");
        tokio::time::sleep(Duration::from_secs(30)).await;
        trigger.trigger();
        handle.await.unwrap().unwrap();

        let checks = portal.checks.lock().unwrap();
        assert_eq!(checks.len(), 3);
        assert!(checks.iter().all(|b| b.name == "eth0"));
        assert_eq!(resolver_probe(&resolver).calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interface_failure_is_fatal_without_logout() {
        let Harness {
            portal,
            mut events,
            session,
            ..
        } = harness(FakePortal::accepting(), account("eth9", 3));

        let err = session.run().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Interface {
                source: InterfaceError::InterfaceNotFound(_),
                ..
            }
        ));
        assert!(portal.logouts.lock().unwrap().is_empty());
        assert_eq!(drain(&mut events).last(), Some(&SessionPhase::Stopped));
    }

    #[tokio::test]
    async fn test_run_once_and_logout_only() {
        let h = harness(FakePortal::rejecting(), account("", 3));
        assert!(!h.session.run_once().await.unwrap());
        assert_eq!(h.portal.login_count(), 1);
        assert!(h.portal.logouts.lock().unwrap().is_empty());

        let h = harness(FakePortal::default(), account("wlan0", 3));
        h.session.logout_only().await.unwrap();
        let logouts = h.portal.logouts.lock().unwrap();
        assert_eq!(logouts.len(), 1);
        assert_eq!(logouts[0].wlanuserip, "192.168.1.20");
        assert_eq!(logouts[0].user_id, "alice@SSGSXY");
    }

    #[test]
    fn test_known_or() {
        assert_eq!(known_or(Some("x"), "fb"), "x");
        assert_eq!(known_or(Some(""), "fb"), "fb");
        assert_eq!(known_or(None, "fb"), "fb");
    }

    fn resolver_probe(resolver: &InterfaceResolver<FakeProbe>) -> &FakeProbe {
        resolver.probe()
    }
}
