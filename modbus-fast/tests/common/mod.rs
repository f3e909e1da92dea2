//! Scripted transport shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use modbus_fast::config::{DeviceEndpoint, PollConfig, RegisterKind};
use modbus_fast::hub::Hub;
use modbus_fast::transport::{
    ModbusTransport, RawReadResult, ReadRequest, TransportAdapter, TransportError, UnitKeyword,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted read outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
    Exception,
    Fail,
    Panic,
}

#[derive(Debug, Default)]
pub struct Script {
    pub reachable: bool,
    pub steps: VecDeque<Step>,
    /// Replayed once `steps` runs out; failure when `None`.
    pub repeat: Option<Step>,
    pub accepts: Option<Vec<UnitKeyword>>,
    pub connects: usize,
    pub closes: usize,
    pub requests: Vec<ReadRequest>,
}

/// Handle for steering a [`ScriptedTransport`] after it moved into a hub.
#[derive(Clone, Default)]
pub struct Control(Arc<Mutex<Script>>);

impl Control {
    pub fn new(steps: Vec<Step>) -> Self {
        let control = Control::default();
        {
            let mut script = control.lock();
            script.reachable = true;
            script.steps = steps.into();
            script.accepts = Some(vec![UnitKeyword::Slave]);
        }
        control
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub fn push(&self, step: Step) {
        self.lock().steps.push_back(step);
    }

    pub fn repeat(&self, step: Step) {
        self.lock().repeat = Some(step);
    }

    pub fn reads(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn transport(&self) -> ScriptedTransport {
        ScriptedTransport {
            control: self.clone(),
            connected: false,
        }
    }
}

pub struct ScriptedTransport {
    control: Control,
    connected: bool,
}

#[async_trait]
impl ModbusTransport for ScriptedTransport {
    async fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let mut script = self.control.lock();
        script.connects += 1;
        if !script.reachable {
            return Err(TransportError::Timeout(timeout));
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.control.lock().closes += 1;
        Ok(())
    }

    fn accepted_unit_keywords(&self) -> Option<Vec<UnitKeyword>> {
        self.control.lock().accepts.clone()
    }

    async fn read(&mut self, request: ReadRequest) -> Result<RawReadResult, TransportError> {
        let step = {
            let mut script = self.control.lock();
            script.requests.push(request);

            if request.unit.keyword != UnitKeyword::Slave {
                return Err(TransportError::UnexpectedKeyword(request.unit.keyword));
            }
            script.steps.pop_front().or_else(|| script.repeat.clone())
        };

        match step {
            Some(Step::Bits(bits)) => Ok(RawReadResult::Bits(bits)),
            Some(Step::Registers(words)) => Ok(RawReadResult::Registers(words)),
            Some(Step::Exception) => Ok(RawReadResult::Exception("IllegalDataAddress".to_string())),
            Some(Step::Panic) => panic!("scripted panic"),
            Some(Step::Fail) | None => {
                self.connected = false;
                Err(TransportError::Read("connection reset by peer".to_string()))
            }
        }
    }
}

pub fn poll(kind: RegisterKind, count: u16, period_ms: u64, change_only: bool) -> PollConfig {
    PollConfig {
        register_kind: kind,
        start_address: 0,
        count,
        sample_period_ms: period_ms,
        change_only,
    }
}

pub fn hub(control: &Control, poll: PollConfig) -> Hub<ScriptedTransport> {
    let endpoint = DeviceEndpoint::new("192.0.2.10", 502, 1);
    let adapter = TransportAdapter::new(control.transport(), endpoint)
        .with_connect_timeout(Duration::from_millis(50));
    Hub::new("test-plc", poll, adapter)
}
