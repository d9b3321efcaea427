//! Launch orchestration: the path from a validated request to a live
//! session handle.
//!
//! Order matters here. The active-session slot is reserved *before* the
//! driver dials out, so two racing launches for the same (user, connection)
//! cannot both reach the remote host; if the driver then fails, the slot is
//! released again.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use hg_domain::audit::AuditResult;
use hg_domain::{Error, Result};
use hg_drivers::{DriverRegistry, LaunchRequest, SessionHandle};
use hg_vault::{IdentityStore, VaultCipher};

use crate::audit::{AuditService, RequestMeta};
use crate::sessions::registry::{ActiveSessionRecord, ActiveSessionRegistry};
use crate::sessions::store::{ConnectionSession, ConnectionSessionStatus, ConnectionSessionStore};

/// Everything the boundary has resolved before asking for a launch.
#[derive(Debug, Clone)]
pub struct LaunchInput {
    pub user_id: String,
    pub user_name: String,
    pub connection_id: String,
    pub connection_name: String,
    pub protocol_id: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub settings: BTreeMap<String, serde_json::Value>,
    /// Vault identity to unseal for the driver, if the connection links one.
    pub identity_id: Option<String>,
    pub team_id: Option<String>,
}

pub struct SessionLauncher {
    drivers: Arc<DriverRegistry>,
    vault: Arc<VaultCipher>,
    identities: Arc<dyn IdentityStore>,
    registry: Arc<ActiveSessionRegistry>,
    durable: Arc<dyn ConnectionSessionStore>,
    audit: Arc<AuditService>,
}

impl SessionLauncher {
    pub fn new(
        drivers: Arc<DriverRegistry>,
        vault: Arc<VaultCipher>,
        identities: Arc<dyn IdentityStore>,
        registry: Arc<ActiveSessionRegistry>,
        durable: Arc<dyn ConnectionSessionStore>,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            drivers,
            vault,
            identities,
            registry,
            durable,
            audit,
        }
    }

    /// Launch a session. Returns the session ID and the driver's handle.
    pub async fn launch(
        &self,
        input: LaunchInput,
        meta: RequestMeta,
    ) -> Result<(String, Box<dyn SessionHandle>)> {
        let result = self.try_launch(&input, &meta).await;

        let outcome = match &result {
            Ok(_) => AuditResult::Success,
            Err(err) if err.kind() == hg_domain::ErrorKind::Forbidden => AuditResult::Denied,
            Err(_) => AuditResult::Failure,
        };
        self.audit
            .record(
                &input.user_id,
                &input.user_name,
                "session.launch",
                &format!("connection:{}", input.connection_id),
                outcome,
                meta,
                BTreeMap::new(),
            )
            .await;
        result
    }

    async fn try_launch(
        &self,
        input: &LaunchInput,
        _meta: &RequestMeta,
    ) -> Result<(String, Box<dyn SessionHandle>)> {
        let driver = self
            .drivers
            .get(&input.protocol_id)
            .ok_or_else(|| Error::not_found("protocol driver"))?;

        let credentials = match &input.identity_id {
            Some(identity_id) => self.unseal_credentials(input, identity_id, &driver).await?,
            None => serde_json::Value::Null,
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        // Reserve the (user, connection) slot first; the registry is the
        // single arbiter of the concurrency cap.
        self.registry.register(ActiveSessionRecord {
            id: session_id.clone(),
            connection_id: input.connection_id.clone(),
            connection_name: input.connection_name.clone(),
            user_id: input.user_id.clone(),
            user_name: input.user_name.clone(),
            team_id: input.team_id.clone(),
            protocol_id: input.protocol_id.clone(),
            started_at: now,
            last_seen_at: now,
            host: input.host.clone(),
            port: input.port,
            metadata: BTreeMap::new(),
            capabilities: Some(driver.capabilities()),
        })?;

        self.durable
            .upsert(ConnectionSession {
                id: session_id.clone(),
                connection_id: input.connection_id.clone(),
                user_id: input.user_id.clone(),
                protocol_id: input.protocol_id.clone(),
                status: ConnectionSessionStatus::Opening,
                started_at: now,
                ended_at: None,
                last_heartbeat_at: None,
            })
            .await?;

        let request = LaunchRequest {
            session_id: session_id.clone(),
            connection_id: input.connection_id.clone(),
            user_id: input.user_id.clone(),
            host: input.host.clone(),
            port: input.port,
            settings: input.settings.clone(),
            credentials,
        };

        match driver.launch(request).await {
            Ok(handle) => {
                self.durable
                    .upsert(ConnectionSession {
                        id: session_id.clone(),
                        connection_id: input.connection_id.clone(),
                        user_id: input.user_id.clone(),
                        protocol_id: input.protocol_id.clone(),
                        status: ConnectionSessionStatus::Active,
                        started_at: now,
                        ended_at: None,
                        last_heartbeat_at: Some(Utc::now()),
                    })
                    .await?;
                Ok((session_id, handle))
            }
            Err(err) => {
                // Release the slot; the opened event gets a matching close.
                self.registry.unregister(&session_id);
                let _ = self.durable.mark_closed(&session_id, Utc::now()).await;
                Err(err)
            }
        }
    }

    /// Open the identity payload and validate it against the driver's
    /// credential template before it goes anywhere near a transport.
    async fn unseal_credentials(
        &self,
        input: &LaunchInput,
        identity_id: &str,
        driver: &Arc<dyn hg_drivers::Driver>,
    ) -> Result<serde_json::Value> {
        let identity = self
            .identities
            .get(identity_id)
            .await?
            .ok_or_else(|| Error::not_found("identity"))?;
        if identity.user_id != input.user_id {
            // Sharing grants are resolved at the boundary; an unshared
            // foreign identity is a straight denial.
            return Err(Error::forbidden("identity does not belong to this user"));
        }

        let plaintext = self.vault.open(&identity.sealed_payload)?;
        let credentials: serde_json::Value = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::integrity("identity payload is not valid JSON").with_source(e))?;

        let fields: BTreeMap<String, serde_json::Value> = credentials
            .as_object()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        driver.credential_template().validate(&fields)?;
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hg_crypto::KdfParams;
    use hg_domain::audit::{AuditStore, MemoryAuditStore};
    use hg_drivers::{
        DriverCapabilities, DriverDescriptor, FieldKind, Template,
    };
    use hg_vault::{IdentityRecord, MemoryIdentityStore};
    use parking_lot::Mutex as PlMutex;

    use crate::realtime::{EventSink, ServerFrame};
    use crate::sessions::store::MemoryConnectionSessionStore;

    struct NullSink;

    impl EventSink for NullSink {
        fn emit(&self, _stream: &str, _frame: ServerFrame) {}
    }

    /// Driver that records launches and can be told to fail.
    struct ScriptedDriver {
        fail: bool,
        launches: PlMutex<Vec<LaunchRequest>>,
    }

    #[derive(Debug)]
    struct ScriptedHandle {
        session_id: String,
    }

    #[async_trait::async_trait]
    impl SessionHandle for ScriptedHandle {
        fn session_id(&self) -> &str {
            &self.session_id
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl hg_drivers::Driver for ScriptedDriver {
        fn descriptor(&self) -> DriverDescriptor {
            DriverDescriptor {
                id: "ssh".into(),
                module: "drivers/ssh".into(),
                title: "SSH".into(),
                category: "remote".into(),
                icon: "ssh.svg".into(),
                version: "1.0.0".into(),
                sort_order: 1,
            }
        }

        fn capabilities(&self) -> DriverCapabilities {
            DriverCapabilities {
                terminal: true,
                ..Default::default()
            }
        }

        fn credential_template(&self) -> Template {
            Template::new("ssh")
                .field("username", "Username", FieldKind::Text, true)
                .field("password", "Password", FieldKind::Secret, false)
        }

        async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn SessionHandle>> {
            if self.fail {
                return Err(Error::upstream("host unreachable"));
            }
            let session_id = request.session_id.clone();
            self.launches.lock().push(request);
            Ok(Box::new(ScriptedHandle { session_id }))
        }
    }

    struct Harness {
        launcher: SessionLauncher,
        registry: Arc<ActiveSessionRegistry>,
        identities: Arc<MemoryIdentityStore>,
        vault: Arc<VaultCipher>,
        audit_store: Arc<MemoryAuditStore>,
        durable: Arc<MemoryConnectionSessionStore>,
    }

    fn harness(fail_driver: bool) -> Harness {
        let drivers = Arc::new(DriverRegistry::new());
        drivers
            .register(Arc::new(ScriptedDriver {
                fail: fail_driver,
                launches: PlMutex::new(Vec::new()),
            }))
            .unwrap();

        let vault = Arc::new(
            VaultCipher::new(
                &[9u8; 32],
                None,
                Some(KdfParams {
                    time_cost: 1,
                    memory_kib: 64,
                    parallelism: 1,
                    output_len: 32,
                }),
            )
            .unwrap(),
        );
        let identities = Arc::new(MemoryIdentityStore::new());
        let registry = Arc::new(ActiveSessionRegistry::new(Arc::new(NullSink)));
        let durable = Arc::new(MemoryConnectionSessionStore::new());
        let audit_store = Arc::new(MemoryAuditStore::new());

        Harness {
            launcher: SessionLauncher::new(
                drivers,
                vault.clone(),
                identities.clone(),
                registry.clone(),
                durable.clone(),
                Arc::new(AuditService::new(audit_store.clone())),
            ),
            registry,
            identities,
            vault,
            audit_store,
            durable,
        }
    }

    fn input(identity_id: Option<&str>) -> LaunchInput {
        LaunchInput {
            user_id: "u1".into(),
            user_name: "alice".into(),
            connection_id: "c1".into(),
            connection_name: "build box".into(),
            protocol_id: "ssh".into(),
            host: Some("host.example".into()),
            port: Some(22),
            settings: BTreeMap::new(),
            identity_id: identity_id.map(str::to_string),
            team_id: None,
        }
    }

    async fn seed_identity(h: &Harness, owner: &str, payload: &[u8]) {
        h.identities
            .insert(IdentityRecord {
                id: "i1".into(),
                user_id: owner.into(),
                driver_id: "ssh".into(),
                name: "root@build".into(),
                sealed_payload: h.vault.seal(payload).unwrap(),
                key_version: 1,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn launch_reserves_slot_and_returns_handle() {
        let h = harness(false);
        seed_identity(&h, "u1", br#"{"username":"root","password":"hunter2"}"#).await;

        let (session_id, handle) = h
            .launcher
            .launch(input(Some("i1")), RequestMeta::default())
            .await
            .unwrap();
        assert_eq!(handle.session_id(), session_id);
        assert!(h.registry.has_active_session("u1", "c1"));

        // Durable row went opening → active.
        let row = h.durable.get(&session_id).await.unwrap().unwrap();
        assert_eq!(row.status, ConnectionSessionStatus::Active);

        // Audited as a success.
        let audit = h.audit_store.recent(1).await.unwrap();
        assert_eq!(audit[0].action, "session.launch");
        assert_eq!(audit[0].result, AuditResult::Success);
    }

    #[tokio::test]
    async fn second_launch_for_same_slot_conflicts() {
        let h = harness(false);
        h.launcher
            .launch(input(None), RequestMeta::default())
            .await
            .unwrap();

        let err = h
            .launcher
            .launch(input(None), RequestMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), hg_domain::ErrorKind::Conflict);
        assert_eq!(h.registry.count(), 1);
    }

    #[tokio::test]
    async fn driver_failure_releases_the_slot() {
        let h = harness(true);
        let err = h
            .launcher
            .launch(input(None), RequestMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), hg_domain::ErrorKind::Upstream);

        // The slot is free again and the durable row closed.
        assert!(!h.registry.has_active_session("u1", "c1"));
        let rows = h.durable.list_for_connection("c1").await.unwrap();
        assert_eq!(rows[0].status, ConnectionSessionStatus::Closed);
    }

    #[tokio::test]
    async fn foreign_identity_is_denied_and_audited() {
        let h = harness(false);
        seed_identity(&h, "someone-else", br#"{"username":"root"}"#).await;

        let err = h
            .launcher
            .launch(input(Some("i1")), RequestMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), hg_domain::ErrorKind::Forbidden);
        assert_eq!(h.registry.count(), 0);

        let audit = h.audit_store.recent(1).await.unwrap();
        assert_eq!(audit[0].result, AuditResult::Denied);
    }

    #[tokio::test]
    async fn payload_failing_the_template_never_launches() {
        let h = harness(false);
        seed_identity(&h, "u1", br#"{"username":"root","backdoor":"x"}"#).await;

        let err = h
            .launcher
            .launch(input(Some("i1")), RequestMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), hg_domain::ErrorKind::Validation);
        assert_eq!(h.registry.count(), 0);
    }

    #[tokio::test]
    async fn unknown_protocol_is_not_found() {
        let h = harness(false);
        let mut bad = input(None);
        bad.protocol_id = "telnet".into();
        let err = h
            .launcher
            .launch(bad, RequestMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), hg_domain::ErrorKind::NotFound);
    }
}
