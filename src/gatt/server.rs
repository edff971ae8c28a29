use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::bridge::ServiceDesc;
use crate::config::Config;
use crate::gap::AdvParams;
use crate::host::Stack;

use super::*;

/// GATT server registry and request dispatcher.
///
/// Owns the declared topology, the per-device subscription registry, and the
/// correlation tables for asynchronous platform results. Application calls
/// and platform callbacks arrive on different execution contexts; all shared
/// state is lock-protected, with the `schema` lock ordered before `subs`
/// wherever both are taken.
#[derive(Debug)]
pub struct Server<S> {
    stack: S,
    config: Config,
    schema: Mutex<Schema>,
    subs: Mutex<Subscriptions>,
    pending: Mutex<Pending>,
    events: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    radio: watch::Sender<RadioState>,
    token: AtomicU32,
}

impl<S: Stack> Server<S> {
    /// Creates a new registry with the default configuration. Fails with
    /// [`Error::HardwareUnsupported`] if the adapter cannot act as an LE
    /// peripheral, making every subsequent operation unrepresentable.
    #[inline]
    pub fn new(stack: S) -> Result<Self> {
        Self::with_config(stack, Config::default())
    }

    /// Creates a new registry with the specified configuration.
    pub fn with_config(stack: S, config: Config) -> Result<Self> {
        if !stack.le_peripheral_supported() {
            return Err(Error::HardwareUnsupported);
        }
        let (radio, _) = watch::channel(stack.radio_state());
        Ok(Self {
            schema: Mutex::new(Schema::new(config.attr_capacity)),
            subs: Mutex::new(Subscriptions::default()),
            pending: Mutex::new(Pending::default()),
            events: Mutex::new(None),
            radio,
            token: AtomicU32::new(1),
            stack,
            config,
        })
    }

    /// Declares an empty primary service, replacing any prior entry with the
    /// same UUID.
    pub fn declare_service(&self, uuid: Uuid) {
        self.schema.lock().declare(uuid);
    }

    /// Appends a characteristic to a declared service. NOTIFY/INDICATE
    /// characteristics get their CCC descriptor synthesized here.
    pub fn add_characteristic(
        &self,
        service: Uuid,
        uuid: Uuid,
        props: Prop,
        perms: Perm,
    ) -> Result<()> {
        (self.schema.lock()).add_characteristic(service, uuid, props, perms)
    }

    /// Appends a descriptor to a declared characteristic. A failure leaves
    /// previously added attributes in place; the caller may re-declare the
    /// service from scratch.
    pub fn add_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        uuid: Uuid,
        perms: Perm,
        value: Vec<u8>,
    ) -> Result<()> {
        (self.schema.lock()).add_descriptor(service, characteristic, uuid, perms, value)
    }

    /// Declares a complete service from a bridge document: the service entry,
    /// its characteristics with initial values, and their descriptors.
    pub fn declare_from_desc(&self, desc: &ServiceDesc) -> Result<()> {
        let mut schema = self.schema.lock();
        schema.declare(desc.uuid);
        for c in &desc.characteristics {
            schema.add_characteristic(
                desc.uuid,
                c.uuid,
                Prop::from_bits_truncate(c.properties),
                Perm::from_bits_truncate(c.permissions),
            )?;
            if let Some(v) = &c.value {
                if let Some(chr) = schema.characteristic_mut(desc.uuid, c.uuid) {
                    chr.set_value(&v.clone().into_bytes());
                }
            }
            for d in &c.descriptors {
                schema.add_descriptor(
                    desc.uuid,
                    c.uuid,
                    d.uuid,
                    Perm::from_bits_truncate(d.permissions),
                    d.value.clone().map_or_else(Vec::new, |v| v.into_bytes()),
                )?;
            }
        }
        Ok(())
    }

    /// Submits a fully-built service to the platform stack. The result is
    /// resolved by the stack's service-added callback, correlated through a
    /// per-UUID pending table; a second publish of the same UUID while one is
    /// in flight fails immediately.
    pub async fn publish_service(&self, service: Uuid) -> Result<()> {
        let svc = {
            let schema = self.schema.lock();
            let svc = schema.service(service).ok_or(Error::Publish {
                service,
                status: Status::InvalidHandle,
            })?;
            if svc.is_published() {
                return Err(Error::Publish {
                    service,
                    status: Status::Failure,
                });
            }
            svc.clone()
        };
        let rx = {
            let mut pending = self.pending.lock();
            if pending.publish.contains_key(&service) {
                return Err(Error::Publish {
                    service,
                    status: Status::Failure,
                });
            }
            let (tx, rx) = oneshot::channel();
            pending.publish.insert(service, tx);
            rx
        };
        if let Err(status) = self.stack.add_service(&svc) {
            self.pending.lock().publish.remove(&service);
            return Err(Error::Publish { service, status });
        }
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Starts advertising the service UUID with an optional local device
    /// name. Returns the token identifying the advertising set, which
    /// [`Self::stop_advertising`] accepts. Concurrent requests are correlated
    /// independently by token.
    pub async fn start_advertising(
        &self,
        service: Uuid,
        local_name: Option<&str>,
    ) -> Result<Token> {
        let params = AdvParams {
            service,
            local_name: local_name.map(str::to_owned),
            mode: self.config.adv_mode,
            tx_power: self.config.adv_tx_power,
            include_name: self.config.adv_include_name,
        };
        let token = self.next_token();
        let rx = {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().adv.insert(token, tx);
            rx
        };
        if let Err(e) = self.stack.start_advertising(token, &params) {
            self.pending.lock().adv.remove(&token);
            return Err(e.into());
        }
        rx.await.map_err(|_| Error::Closed)??;
        Ok(token)
    }

    /// Stops the advertising set identified by `token`.
    #[inline]
    pub fn stop_advertising(&self, token: Token) {
        self.stack.stop_advertising(token);
    }

    /// Updates a characteristic value. Notify/indicate-capable
    /// characteristics fan the new value out to the devices subscribed at the
    /// time of the call; per-device delivery is best-effort and failures are
    /// not surfaced to the caller.
    pub fn set_characteristic_value(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let props = {
            let mut schema = self.schema.lock();
            if schema.service(service).is_none() {
                return Err(Error::NotFound(service));
            }
            let chr = (schema.characteristic_mut(service, characteristic))
                .ok_or(Error::NotFound(characteristic))?;
            chr.set_value(value);
            chr.properties()
        };
        if !props.needs_ccc() {
            return Ok(());
        }
        let confirm = props.contains(Prop::INDICATE);
        for dev in self.subs.lock().snapshot(service, characteristic) {
            if let Err(status) = (self.stack).notify(&dev, service, characteristic, value, confirm)
            {
                debug!("Notification to {dev} failed: {status}");
            }
        }
        Ok(())
    }

    /// Asks the user to enable the radio via the platform dialog.
    pub async fn request_enable(&self) -> Result<()> {
        let token = self.next_token();
        let rx = {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().enable.insert(token, tx);
            rx
        };
        self.stack.request_enable(token);
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Opens the platform Bluetooth settings screen. Fire-and-forget.
    #[inline]
    pub fn open_settings(&self) {
        self.stack.open_settings();
    }

    /// Returns the application-facing event stream. A subsequent call
    /// replaces the previous listener.
    pub fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.events.lock().replace(tx).is_some() {
            debug!("Replacing event listener");
        }
        rx
    }

    /// Returns a watch over the adapter radio state, seeded with the current
    /// state.
    #[inline]
    pub fn radio_states(&self) -> watch::Receiver<RadioState> {
        self.radio.subscribe()
    }

    /// Dispatches one inbound platform callback. Read and write requests are
    /// answered within this call via [`Stack::send_response`].
    pub fn handle_callback(&self, cb: Callback) {
        match cb {
            Callback::ConnectionChanged {
                device,
                status,
                state,
            } => {
                if !status.is_ok() {
                    debug!("Connection state of {device} reported with {status}");
                }
                if state == ConnectionState::Disconnected {
                    self.subs.lock().remove_device(&device);
                }
                self.emit(Event::ConnectionChanged { device, state });
            }
            Callback::ServiceAdded { status, service } => {
                let Some(tx) = self.pending.lock().publish.remove(&service) else {
                    debug!("Unsolicited service-added result for {service}: {status}");
                    return;
                };
                let r = if status.is_ok() {
                    self.schema.lock().mark_published(service);
                    Ok(())
                } else {
                    Err(Error::Publish { service, status })
                };
                let _ = tx.send(r);
            }
            Callback::CharacteristicRead {
                device,
                request,
                offset,
                service,
                characteristic,
            } => {
                let val = (self.schema.lock())
                    .characteristic(service, characteristic)
                    .map(|c| read_slice(c.value(), offset));
                match val {
                    Some(v) => self.respond(&device, request, Status::Success, offset, &v),
                    None => {
                        warn!("Read of unknown characteristic {characteristic} from {device}");
                        self.respond(&device, request, Status::InvalidHandle, offset, &[]);
                    }
                }
            }
            Callback::CharacteristicWrite {
                device,
                request,
                service,
                characteristic,
                value,
                response_needed,
            } => {
                let known = {
                    let mut schema = self.schema.lock();
                    match schema.characteristic_mut(service, characteristic) {
                        Some(chr) => {
                            chr.set_value(&value);
                            true
                        }
                        None => false,
                    }
                };
                if !known {
                    warn!("Write to unknown characteristic {characteristic} from {device}");
                    if response_needed {
                        self.respond(&device, request, Status::InvalidHandle, 0, &[]);
                    }
                    return;
                }
                if response_needed {
                    self.respond(&device, request, Status::Success, 0, &value);
                }
                self.emit(Event::Write {
                    service,
                    characteristic,
                    value,
                });
            }
            Callback::DescriptorRead {
                device,
                request,
                offset,
                service,
                characteristic,
                descriptor,
            } => {
                let val = if descriptor == CLIENT_CHARACTERISTIC_CONFIGURATION {
                    let known = (self.schema.lock())
                        .characteristic(service, characteristic)
                        .map_or(false, |c| c.descriptor(descriptor).is_some());
                    known.then(|| {
                        let v = match self.subs.lock().get(&device, service, characteristic) {
                            Some(true) => ENABLE_INDICATION_VALUE,
                            Some(false) => ENABLE_NOTIFICATION_VALUE,
                            None => DISABLE_NOTIFICATION_VALUE,
                        };
                        read_slice(&v, offset)
                    })
                } else {
                    (self.schema.lock())
                        .characteristic(service, characteristic)
                        .and_then(|c| c.descriptor(descriptor))
                        .map(|d| read_slice(d.value(), offset))
                };
                match val {
                    Some(v) => self.respond(&device, request, Status::Success, offset, &v),
                    None => {
                        warn!("Read of unknown descriptor {descriptor} from {device}");
                        self.respond(&device, request, Status::InvalidHandle, offset, &[]);
                    }
                }
            }
            Callback::DescriptorWrite {
                device,
                request,
                service,
                characteristic,
                descriptor,
                value,
                response_needed,
            } => {
                match self.client_cfg_write(&device, service, characteristic, descriptor, &value) {
                    Ok(()) => {
                        if response_needed {
                            self.respond(&device, request, Status::Success, 0, &value);
                        }
                    }
                    Err(e) => {
                        warn!("Rejected descriptor write from {device}: {e}");
                        if response_needed {
                            let status = match e {
                                Error::NotFound(_) => Status::InvalidHandle,
                                _ => Status::RequestNotSupported,
                            };
                            self.respond(&device, request, status, 0, &[]);
                        }
                    }
                }
            }
            Callback::NotificationSent { device, status } => {
                debug!("Notification to {device} completed with {status}");
            }
            Callback::AdvertisingResult { token, error } => {
                let Some(tx) = self.pending.lock().adv.remove(&token) else {
                    debug!("Unsolicited advertising result for token {token}");
                    return;
                };
                let _ = tx.send(error.map_or(Ok(()), |e| Err(e.into())));
            }
            Callback::ActivityResult { token, ok } => {
                let Some(tx) = self.pending.lock().enable.remove(&token) else {
                    debug!("Unsolicited activity result for token {token}");
                    return;
                };
                let _ = tx.send(if ok { Ok(()) } else { Err(Error::UserDeclined) });
            }
            Callback::RadioStateChanged { state } => {
                self.radio.send_replace(state);
            }
        }
    }

    /// Applies a CCC write to the subscription registry. Writes to any other
    /// descriptor, or unrecognized CCC patterns, are unsupported.
    fn client_cfg_write(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        if descriptor != CLIENT_CHARACTERISTIC_CONFIGURATION {
            return Err(Error::UnsupportedWrite(descriptor));
        }
        let props = (self.schema.lock())
            .characteristic(service, characteristic)
            .map(Characteristic::properties)
            .ok_or(Error::NotFound(characteristic))?;
        if !props.needs_ccc() {
            return Err(Error::UnsupportedWrite(descriptor));
        }
        let mut subs = self.subs.lock();
        if value == ENABLE_NOTIFICATION_VALUE && props.contains(Prop::NOTIFY) {
            subs.subscribe(device, service, characteristic, false);
        } else if value == ENABLE_INDICATION_VALUE && props.contains(Prop::INDICATE) {
            subs.subscribe(device, service, characteristic, true);
        } else if value == DISABLE_NOTIFICATION_VALUE {
            subs.unsubscribe(device, service, characteristic);
        } else {
            return Err(Error::UnsupportedWrite(descriptor));
        }
        Ok(())
    }

    /// Sends a response to the remote device, logging a dropped response.
    fn respond(
        &self,
        device: &DeviceId,
        request: RequestId,
        status: Status,
        offset: u16,
        value: &[u8],
    ) {
        if !self.stack.send_response(device, request, status, offset, value) {
            warn!("Dropped response {request} for {device}");
        }
    }

    /// Delivers an event to the application listener, if any.
    fn emit(&self, event: Event) {
        match &*self.events.lock() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("Event listener is gone");
                }
            }
            None => debug!("No event listener registered"),
        }
    }

    /// Returns the next correlation token.
    #[inline]
    fn next_token(&self) -> Token {
        self.token.fetch_add(1, Ordering::Relaxed)
    }
}

/// Returns the value starting at the requested offset, or an empty slice if
/// the offset is past the end.
fn read_slice(v: &[u8], offset: u16) -> Vec<u8> {
    v.get(usize::from(offset)..).unwrap_or_default().to_vec()
}

/// Notify/indicate subscriptions keyed by `(device, service,
/// characteristic)`. The value records whether the device asked for
/// indications, which the CCC read-back reports.
#[derive(Debug, Default)]
struct Subscriptions(BTreeMap<(DeviceId, Uuid, Uuid), bool>);

impl Subscriptions {
    fn subscribe(&mut self, device: &DeviceId, service: Uuid, characteristic: Uuid, ind: bool) {
        self.0.insert((device.clone(), service, characteristic), ind);
    }

    fn unsubscribe(&mut self, device: &DeviceId, service: Uuid, characteristic: Uuid) {
        self.0.remove(&(device.clone(), service, characteristic));
    }

    fn remove_device(&mut self, device: &DeviceId) {
        self.0.retain(|(d, _, _), _| d != device);
    }

    fn get(&self, device: &DeviceId, service: Uuid, characteristic: Uuid) -> Option<bool> {
        (self.0).get(&(device.clone(), service, characteristic)).copied()
    }

    /// Returns the devices subscribed to the characteristic at this moment.
    fn snapshot(&self, service: Uuid, characteristic: Uuid) -> SmallVec<[DeviceId; 4]> {
        (self.0.keys())
            .filter(|(_, s, c)| *s == service && *c == characteristic)
            .map(|(d, _, _)| d.clone())
            .collect()
    }
}

/// Pending asynchronous results keyed by request identity, so that
/// concurrent requests of the same kind never overwrite each other.
#[derive(Debug, Default)]
struct Pending {
    publish: BTreeMap<Uuid, oneshot::Sender<Result<()>>>,
    adv: HashMap<Token, oneshot::Sender<Result<()>>>,
    enable: HashMap<Token, oneshot::Sender<Result<()>>>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use matches::assert_matches;

    use crate::host::mock::{Call, MockStack};

    use super::*;

    const HR_SERVICE: &str = "0000180d-0000-1000-8000-00805f9b34fb";
    const HR_MEASUREMENT: &str = "00002a37-0000-1000-8000-00805f9b34fb";

    fn uuid(s: &str) -> Uuid {
        s.parse().unwrap()
    }

    fn server() -> (Arc<Server<MockStack>>, MockStack) {
        let mock = MockStack::new();
        let srv = Arc::new(Server::new(mock.clone()).unwrap());
        (srv, mock)
    }

    /// Runs the publish flow to completion by answering the stack callback.
    async fn publish(srv: &Arc<Server<MockStack>>, mock: &MockStack, service: Uuid) {
        let s = Arc::clone(srv);
        let task = tokio::spawn(async move { s.publish_service(service).await });
        while !(mock.calls().iter())
            .any(|c| matches!(c, Call::AddService(s) if s.uuid() == service))
        {
            tokio::task::yield_now().await;
        }
        srv.handle_callback(Callback::ServiceAdded {
            status: Status::Success,
            service,
        });
        task.await.unwrap().unwrap();
    }

    fn hr_declare(srv: &Server<MockStack>, props: Prop) {
        srv.declare_service(uuid(HR_SERVICE));
        srv.add_characteristic(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), props, Perm::READ)
            .unwrap();
    }

    fn ccc_write(srv: &Server<MockStack>, device: &str, value: [u8; 2]) {
        srv.handle_callback(Callback::DescriptorWrite {
            device: device.into(),
            request: 1,
            service: uuid(HR_SERVICE),
            characteristic: uuid(HR_MEASUREMENT),
            descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION.as_uuid(),
            value: value.to_vec(),
            response_needed: false,
        });
    }

    fn notifications(mock: &MockStack) -> Vec<(DeviceId, Vec<u8>, bool)> {
        (mock.calls().into_iter())
            .filter_map(|c| match c {
                Call::Notify {
                    device,
                    value,
                    confirm,
                    ..
                } => Some((device, value, confirm)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn hardware_unsupported() {
        let mock = MockStack::new();
        mock.set_supported(false);
        assert_matches!(Server::new(mock), Err(Error::HardwareUnsupported));
    }

    #[tokio::test]
    async fn publish_round_trip() {
        let (srv, mock) = server();
        let svc = uuid("6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        srv.declare_service(svc);
        for c in ["6e400002-b5a3-f393-e0a9-e50e24dcca9e", "6e400003-b5a3-f393-e0a9-e50e24dcca9e"] {
            srv.add_characteristic(svc, uuid(c), Prop::NOTIFY, Perm::READ).unwrap();
            srv.add_descriptor(svc, uuid(c), uuid("2901"), Perm::READ, b"desc".to_vec())
                .unwrap();
        }
        publish(&srv, &mock, svc).await;

        let published = (mock.calls().into_iter())
            .find_map(|c| match c {
                Call::AddService(s) => Some(s),
                _ => None,
            })
            .unwrap();
        assert!(published.is_primary());
        assert_eq!(published.characteristics().len(), 2);
        for c in published.characteristics() {
            // User description plus the synthesized CCC
            assert_eq!(c.descriptors().len(), 2);
            assert!(c.descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION.as_uuid()).is_some());
        }

        // Topology is frozen once published
        assert_matches!(
            srv.add_characteristic(svc, uuid("2A37"), Prop::READ, Perm::READ),
            Err(Error::AlreadyPublished(_))
        );
    }

    #[tokio::test]
    async fn publish_unknown_service() {
        let (srv, _) = server();
        assert_matches!(
            srv.publish_service(uuid(HR_SERVICE)).await,
            Err(Error::Publish { .. })
        );
    }

    #[tokio::test]
    async fn publish_rejected_by_stack() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);
        let s = Arc::clone(&srv);
        let task = tokio::spawn(async move { s.publish_service(uuid(HR_SERVICE)).await });
        while mock.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        srv.handle_callback(Callback::ServiceAdded {
            status: Status::Failure,
            service: uuid(HR_SERVICE),
        });
        assert_matches!(
            task.await.unwrap(),
            Err(Error::Publish {
                status: Status::Failure,
                ..
            })
        );
        // A failed publish leaves the topology editable
        assert!(srv
            .add_characteristic(uuid(HR_SERVICE), uuid("2A38"), Prop::READ, Perm::READ)
            .is_ok());
    }

    #[tokio::test]
    async fn publish_submit_failure() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);
        mock.fail_add_service(Status::ConnectionCongested);
        assert_matches!(
            srv.publish_service(uuid(HR_SERVICE)).await,
            Err(Error::Publish {
                status: Status::ConnectionCongested,
                ..
            })
        );
        // The pending slot is released, so a retry goes through
        mock.take_calls();
        publish(&srv, &mock, uuid(HR_SERVICE)).await;
    }

    #[tokio::test]
    async fn concurrent_publish_same_uuid() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);
        let s = Arc::clone(&srv);
        let task = tokio::spawn(async move { s.publish_service(uuid(HR_SERVICE)).await });
        while mock.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        // Second publish of the same UUID fails without touching the stack
        assert_matches!(
            srv.publish_service(uuid(HR_SERVICE)).await,
            Err(Error::Publish { .. })
        );
        srv.handle_callback(Callback::ServiceAdded {
            status: Status::Success,
            service: uuid(HR_SERVICE),
        });
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn notify_subscribed_devices() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);
        publish(&srv, &mock, uuid(HR_SERVICE)).await;

        ccc_write(&srv, "AA:BB:CC:DD:EE:FF", ENABLE_NOTIFICATION_VALUE);
        mock.take_calls();
        srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[0x00, 0x50])
            .unwrap();

        let sent = notifications(&mock);
        assert_eq!(
            sent,
            vec![(DeviceId::new("AA:BB:CC:DD:EE:FF"), vec![0x00, 0x50], false)]
        );
    }

    #[tokio::test]
    async fn indicate_sets_confirm() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::INDICATE);
        publish(&srv, &mock, uuid(HR_SERVICE)).await;

        ccc_write(&srv, "A", ENABLE_INDICATION_VALUE);
        mock.take_calls();
        srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[1])
            .unwrap();
        assert_eq!(notifications(&mock), vec![(DeviceId::new("A"), vec![1], true)]);
    }

    #[tokio::test]
    async fn notify_failure_is_best_effort() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);
        publish(&srv, &mock, uuid(HR_SERVICE)).await;

        ccc_write(&srv, "A", ENABLE_NOTIFICATION_VALUE);
        mock.take_calls();
        mock.fail_notify(Status::Failure);
        // Delivery failure is logged, never surfaced to the caller
        srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[4])
            .unwrap();
        assert_eq!(notifications(&mock).len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_notifications() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);
        publish(&srv, &mock, uuid(HR_SERVICE)).await;

        ccc_write(&srv, "A", ENABLE_NOTIFICATION_VALUE);
        ccc_write(&srv, "A", DISABLE_NOTIFICATION_VALUE);
        mock.take_calls();
        srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[2])
            .unwrap();
        assert!(notifications(&mock).is_empty());
    }

    #[tokio::test]
    async fn disconnect_clears_subscription() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);
        publish(&srv, &mock, uuid(HR_SERVICE)).await;
        let mut events = srv.events();

        ccc_write(&srv, "A", ENABLE_NOTIFICATION_VALUE);
        srv.handle_callback(Callback::ConnectionChanged {
            device: "A".into(),
            status: Status::Success,
            state: ConnectionState::Disconnected,
        });
        mock.take_calls();
        srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[3])
            .unwrap();
        assert!(notifications(&mock).is_empty());
        assert_eq!(
            events.try_recv().unwrap(),
            Event::ConnectionChanged {
                device: "A".into(),
                state: ConnectionState::Disconnected,
            }
        );
    }

    #[tokio::test]
    async fn notify_skips_unsubscribed_devices() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::READ | Prop::NOTIFY);
        publish(&srv, &mock, uuid(HR_SERVICE)).await;

        ccc_write(&srv, "A", ENABLE_NOTIFICATION_VALUE);
        // B connects but never subscribes
        srv.handle_callback(Callback::ConnectionChanged {
            device: "B".into(),
            status: Status::Success,
            state: ConnectionState::Connected,
        });
        mock.take_calls();
        srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[0x00, 0x50])
            .unwrap();
        let sent = notifications(&mock);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, DeviceId::new("A"));
    }

    #[test]
    fn read_with_offset() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::READ);
        srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[1, 2, 3, 4, 5])
            .unwrap();

        let read = |offset| {
            srv.handle_callback(Callback::CharacteristicRead {
                device: "A".into(),
                request: 7,
                offset,
                service: uuid(HR_SERVICE),
                characteristic: uuid(HR_MEASUREMENT),
            });
            match mock.take_calls().pop().unwrap() {
                Call::SendResponse { status, value, .. } => (status, value),
                c => panic!("unexpected call {c:?}"),
            }
        };
        assert_eq!(read(0), (Status::Success, vec![1, 2, 3, 4, 5]));
        assert_eq!(read(2), (Status::Success, vec![3, 4, 5]));
        // Past the end: empty, not a fault
        assert_eq!(read(10), (Status::Success, vec![]));
    }

    #[test]
    fn read_unknown_characteristic() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::READ);
        srv.handle_callback(Callback::CharacteristicRead {
            device: "A".into(),
            request: 7,
            offset: 0,
            service: uuid(HR_SERVICE),
            characteristic: uuid("2A00"),
        });
        assert_matches!(
            mock.take_calls().pop().unwrap(),
            Call::SendResponse {
                status: Status::InvalidHandle,
                ..
            }
        );
    }

    #[test]
    fn write_updates_value_and_emits_event() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::READ | Prop::WRITE);
        let mut events = srv.events();

        srv.handle_callback(Callback::CharacteristicWrite {
            device: "A".into(),
            request: 9,
            service: uuid(HR_SERVICE),
            characteristic: uuid(HR_MEASUREMENT),
            value: vec![7, 8],
            response_needed: true,
        });
        assert_matches!(
            mock.take_calls().pop().unwrap(),
            Call::SendResponse {
                status: Status::Success,
                ..
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            Event::Write {
                service: uuid(HR_SERVICE),
                characteristic: uuid(HR_MEASUREMENT),
                value: vec![7, 8],
            }
        );

        // Value is visible to a subsequent read
        srv.handle_callback(Callback::CharacteristicRead {
            device: "A".into(),
            request: 10,
            offset: 0,
            service: uuid(HR_SERVICE),
            characteristic: uuid(HR_MEASUREMENT),
        });
        assert_matches!(
            mock.take_calls().pop().unwrap(),
            Call::SendResponse { value, .. } if value == vec![7, 8]
        );
    }

    #[test]
    fn write_without_response() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::WRITE_WITHOUT_RESPONSE);
        let mut events = srv.events();
        srv.handle_callback(Callback::CharacteristicWrite {
            device: "A".into(),
            request: 9,
            service: uuid(HR_SERVICE),
            characteristic: uuid(HR_MEASUREMENT),
            value: vec![1],
            response_needed: false,
        });
        assert!(mock.take_calls().is_empty());
        assert_matches!(events.try_recv().unwrap(), Event::Write { .. });
    }

    #[test]
    fn non_ccc_descriptor_write_fails() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);
        srv.add_descriptor(
            uuid(HR_SERVICE),
            uuid(HR_MEASUREMENT),
            uuid("2901"),
            Perm::READ | Perm::WRITE,
            b"hr".to_vec(),
        )
        .unwrap();
        srv.handle_callback(Callback::DescriptorWrite {
            device: "A".into(),
            request: 3,
            service: uuid(HR_SERVICE),
            characteristic: uuid(HR_MEASUREMENT),
            descriptor: uuid("2901"),
            value: vec![0],
            response_needed: true,
        });
        assert_matches!(
            mock.take_calls().pop().unwrap(),
            Call::SendResponse {
                status: Status::RequestNotSupported,
                ..
            }
        );
    }

    #[test]
    fn unrecognized_ccc_pattern_fails() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);
        srv.handle_callback(Callback::DescriptorWrite {
            device: "A".into(),
            request: 3,
            service: uuid(HR_SERVICE),
            characteristic: uuid(HR_MEASUREMENT),
            descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION.as_uuid(),
            value: vec![0x03, 0x00],
            response_needed: true,
        });
        assert_matches!(
            mock.take_calls().pop().unwrap(),
            Call::SendResponse {
                status: Status::RequestNotSupported,
                ..
            }
        );
        // Indication request on a notify-only characteristic is also refused
        ccc_write(&srv, "A", ENABLE_INDICATION_VALUE);
        mock.take_calls();
        srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[1])
            .unwrap();
        assert!(notifications(&mock).is_empty());
    }

    #[test]
    fn ccc_read_reports_subscription_state() {
        let (srv, mock) = server();
        hr_declare(&srv, Prop::NOTIFY);

        let read = || {
            srv.handle_callback(Callback::DescriptorRead {
                device: "A".into(),
                request: 4,
                offset: 0,
                service: uuid(HR_SERVICE),
                characteristic: uuid(HR_MEASUREMENT),
                descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION.as_uuid(),
            });
            match mock.take_calls().pop().unwrap() {
                Call::SendResponse { value, .. } => value,
                c => panic!("unexpected call {c:?}"),
            }
        };
        assert_eq!(read(), DISABLE_NOTIFICATION_VALUE.to_vec());
        ccc_write(&srv, "A", ENABLE_NOTIFICATION_VALUE);
        assert_eq!(read(), ENABLE_NOTIFICATION_VALUE.to_vec());
    }

    #[tokio::test]
    async fn advertising_round_trip() {
        let (srv, mock) = server();
        let s = Arc::clone(&srv);
        let svc = uuid(HR_SERVICE);
        let task = tokio::spawn(async move { s.start_advertising(svc, Some("HR")).await });
        let token = loop {
            let started = (mock.calls().into_iter()).find_map(|c| match c {
                Call::StartAdvertising { token, params } => Some((token, params)),
                _ => None,
            });
            if let Some((token, params)) = started {
                assert_eq!(params.service, svc);
                assert_eq!(params.local_name.as_deref(), Some("HR"));
                break token;
            }
            tokio::task::yield_now().await;
        };
        srv.handle_callback(Callback::AdvertisingResult { token, error: None });
        assert_eq!(task.await.unwrap().unwrap(), token);

        srv.stop_advertising(token);
        assert_matches!(
            mock.take_calls().pop().unwrap(),
            Call::StopAdvertising { token: t } if t == token
        );
    }

    #[tokio::test]
    async fn advertising_failure() {
        let (srv, mock) = server();
        let s = Arc::clone(&srv);
        let task =
            tokio::spawn(async move { s.start_advertising(uuid(HR_SERVICE), None).await });
        let token = loop {
            let t = (mock.calls().into_iter()).find_map(|c| match c {
                Call::StartAdvertising { token, .. } => Some(token),
                _ => None,
            });
            if let Some(t) = t {
                break t;
            }
            tokio::task::yield_now().await;
        };
        srv.handle_callback(Callback::AdvertisingResult {
            token,
            error: Some(AdvFailure::TooManyAdvertisers),
        });
        assert_matches!(
            task.await.unwrap(),
            Err(Error::Advertise(AdvFailure::TooManyAdvertisers))
        );
    }

    #[tokio::test]
    async fn advertising_submit_failure() {
        let (srv, mock) = server();
        mock.fail_advertising(AdvFailure::FeatureUnsupported);
        assert_matches!(
            srv.start_advertising(uuid(HR_SERVICE), None).await,
            Err(Error::Advertise(AdvFailure::FeatureUnsupported))
        );
    }

    #[tokio::test]
    async fn enable_declined() {
        let (srv, mock) = server();
        let s = Arc::clone(&srv);
        let task = tokio::spawn(async move { s.request_enable().await });
        let token = loop {
            let t = (mock.calls().into_iter()).find_map(|c| match c {
                Call::RequestEnable { token } => Some(token),
                _ => None,
            });
            if let Some(t) = t {
                break t;
            }
            tokio::task::yield_now().await;
        };
        srv.handle_callback(Callback::ActivityResult { token, ok: false });
        assert_matches!(task.await.unwrap(), Err(Error::UserDeclined));
    }

    #[test]
    fn radio_state_watch() {
        let mock = MockStack::new();
        mock.set_radio(RadioState::Off);
        let srv = Server::new(mock.clone()).unwrap();
        let states = srv.radio_states();
        assert_eq!(*states.borrow(), RadioState::Off);
        srv.handle_callback(Callback::RadioStateChanged {
            state: RadioState::TurningOn,
        });
        assert_eq!(*states.borrow(), RadioState::TurningOn);
    }

    #[test]
    fn open_settings_passthrough() {
        let (srv, mock) = server();
        srv.open_settings();
        assert_matches!(mock.take_calls().pop().unwrap(), Call::OpenSettings);
    }

    #[test]
    fn declare_from_uart_desc() {
        let (srv, mock) = server();
        let desc: ServiceDesc = serde_json::from_str(
            r#"{
                "uuid": "6E400001-B5A3-F393-E0A9-E50E24DCCA9E",
                "characteristics": [
                    {
                        "uuid": "6E400002-B5A3-F393-E0A9-E50E24DCCA9E",
                        "properties": 8,
                        "permissions": 16,
                        "descriptors": [{"uuid": "2901", "value": "Transmit"}]
                    },
                    {
                        "uuid": "6E400003-B5A3-F393-E0A9-E50E24DCCA9E",
                        "properties": 18,
                        "permissions": 1,
                        "descriptors": [{"uuid": "2901", "value": "Receive"}]
                    }
                ]
            }"#,
        )
        .unwrap();
        srv.declare_from_desc(&desc).unwrap();

        let rx = uuid("6e400003-b5a3-f393-e0a9-e50e24dcca9e");
        let read_desc = |descriptor: Uuid| {
            srv.handle_callback(Callback::DescriptorRead {
                device: "A".into(),
                request: 1,
                offset: 0,
                service: desc.uuid,
                characteristic: rx,
                descriptor,
            });
            match mock.take_calls().pop().unwrap() {
                Call::SendResponse { status, value, .. } => (status, value),
                c => panic!("unexpected call {c:?}"),
            }
        };
        assert_eq!(read_desc(uuid("2901")), (Status::Success, b"Receive".to_vec()));
        // The notify characteristic got its CCC synthesized
        assert_eq!(
            read_desc(CLIENT_CHARACTERISTIC_CONFIGURATION.as_uuid()),
            (Status::Success, DISABLE_NOTIFICATION_VALUE.to_vec())
        );
    }

    #[test]
    fn set_value_unknown_references() {
        let (srv, _) = server();
        assert_matches!(
            srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[1]),
            Err(Error::NotFound(u)) if u == uuid(HR_SERVICE)
        );
        srv.declare_service(uuid(HR_SERVICE));
        assert_matches!(
            srv.set_characteristic_value(uuid(HR_SERVICE), uuid(HR_MEASUREMENT), &[1]),
            Err(Error::NotFound(u)) if u == uuid(HR_MEASUREMENT)
        );
    }
}
