//! Native serial port implementation using the `serialport` crate.
//!
//! [`NativeConnector`] opens the port, clones the handle for a reader
//! thread and hands received bytes to the session's [`LineSink`].

use {
    crate::{
        error::{Error, Result},
        port::{
            DataBits, FlowControl, Parity, Port, PortEnumerator, PortInfo, SerialConfig, StopBits,
        },
        session::{Connector, LineSink, Transport},
    },
    log::{debug, trace, warn},
    serialport::ClearBuffer,
    std::{
        io::{self, Read, Write},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
        })
    }

    /// Second handle to the same port, for a reader thread.
    pub fn try_clone(&self) -> Result<Self> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotConnected, "port closed")))?
            .try_clone()?;
        Ok(Self {
            port: Some(port),
            name: self.name.clone(),
            timeout: self.timeout,
            baud_rate: self.baud_rate,
        })
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.port.take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
            .and_then(Write::flush)
    }
}

/// Opens [`NativePort`]s for a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

impl Connector for NativeConnector {
    fn open(&self, config: &SerialConfig, sink: LineSink) -> Result<Box<dyn Transport>> {
        let mut port = NativePort::open(config)?;
        port.clear_buffers()?;
        let reader_port = port.try_clone()?;

        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let reader = thread::Builder::new()
            .name("holuxlog-reader".into())
            .spawn(move || read_loop(reader_port, &sink, &reader_stop))?;

        debug!("Opened {config}");
        Ok(Box::new(NativeTransport {
            port,
            stop,
            reader: Some(reader),
        }))
    }
}

fn read_loop(mut port: NativePort, sink: &LineSink, stop: &AtomicBool) {
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::Relaxed) && !sink.is_closed() {
        match port.read(&mut buf) {
            Ok(0) => {},
            Ok(n) => sink.push_bytes(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {},
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => {
                warn!("Serial read failed: {e}");
                break;
            },
        }
    }
    trace!("Reader for {} stopped", port.name());
}

struct NativeTransport {
    port: NativePort,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl Transport for NativeTransport {
    fn write(&mut self, bytes: &[u8]) -> bool {
        trace!("-> {}", String::from_utf8_lossy(bytes).trim_end());
        match self.port.write_all_bytes(bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!("Serial write failed: {e}");
                false
            },
        }
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        let _ = self.port.close();
    }
}

impl Drop for NativeTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                serialport::SerialPortType::UsbPort(info) => PortInfo {
                    name: p.port_name,
                    vid: Some(info.vid),
                    pid: Some(info.pid),
                    manufacturer: info.manufacturer,
                    product: info.product,
                    serial_number: info.serial_number,
                },
                _ => PortInfo {
                    name: p.port_name,
                    ..Default::default()
                },
            })
            .collect())
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}
