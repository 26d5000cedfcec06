//! Modbus/TCP slave exposing the thermostat as a small register map.
//!
//! | table            | address | value                               |
//! |------------------|---------|-------------------------------------|
//! | coil             | 0       | enabled                             |
//! | holding register | 0       | setpoint (x100, signed)             |
//! | holding register | 1       | setpoint min (x100, signed)         |
//! | holding register | 2       | setpoint max (x100, signed)         |
//! | holding register | 3       | mode code                           |
//! | holding register | 4       | fan speed code                      |
//! | input register   | 0       | ambient temperature (x100, signed)  |

use std::{io, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::watch,
    task::JoinSet,
};
use tracing::{debug, info, warn};

use thermocktat_common::{
    wait_for_shutdown, FanSpeed, Mode, ThermostatError, ThermostatService,
};

const MBAP_HEADER_LEN: usize = 7;
const MAX_PDU_LEN: usize = 253;
const MODBUS_PROTOCOL_ID: u16 = 0;
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const FN_READ_COILS: u8 = 0x01;
const FN_READ_HOLDING_REGISTERS: u8 = 0x03;
const FN_READ_INPUT_REGISTERS: u8 = 0x04;
const FN_WRITE_SINGLE_COIL: u8 = 0x05;
const FN_WRITE_SINGLE_REGISTER: u8 = 0x06;
const FN_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

const COIL_ENABLED: u16 = 0;
const COIL_COUNT: u16 = 1;

const HR_SETPOINT: u16 = 0;
const HR_SETPOINT_MIN: u16 = 1;
const HR_SETPOINT_MAX: u16 = 2;
const HR_MODE: u16 = 3;
const HR_FAN_SPEED: u16 = 4;
const HOLDING_REGISTER_COUNT: u16 = 5;

const INPUT_REGISTER_COUNT: u16 = 1;

const MAX_READ_BITS: u16 = 2000;
const MAX_READ_REGISTERS: u16 = 125;
const MAX_WRITE_REGISTERS: u16 = 123;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
}

impl From<ThermostatError> for Exception {
    fn from(_: ThermostatError) -> Self {
        Self::IllegalDataValue
    }
}

/// Fixed point with two decimals, saturating at the `i16` range.
pub fn encode_temperature(value: f64) -> u16 {
    let scaled = (value * 100.0)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX));
    scaled as i16 as u16
}

pub fn decode_temperature(raw: u16) -> f64 {
    f64::from(raw as i16) / 100.0
}

/// Accepts connections until shutdown, then waits for every connection task.
pub async fn serve(
    listener: TcpListener,
    service: Arc<dyn ThermostatService>,
    unit_id: u8,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("modbus controller listening on {addr} (unit {unit_id})");
    }

    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("modbus client connected from {peer}");
                    let service = Arc::clone(&service);
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        if let Err(err) = handle_connection(stream, service, unit_id, shutdown).await {
                            warn!("modbus connection from {peer} failed: {err}");
                        }
                        debug!("modbus client {peer} disconnected");
                    });
                }
                Err(err) => {
                    warn!("modbus accept failed: {err}");
                    if backoff(&mut shutdown, ACCEPT_ERROR_BACKOFF).await {
                        break;
                    }
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    while connections.join_next().await.is_some() {}
    info!("modbus controller stopped");
    Ok(())
}

/// Sleeps for `delay` unless shutdown comes first. Returns true on shutdown.
async fn backoff(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = wait_for_shutdown(shutdown) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Serves MBAP frames on one stream until EOF or shutdown. Frames for
/// another unit id or protocol are read and dropped.
pub async fn handle_connection<S>(
    mut stream: S,
    service: Arc<dyn ThermostatService>,
    unit_id: u8,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let mut header = [0u8; MBAP_HEADER_LEN];
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
            read = stream.read_exact(&mut header) => match read {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err),
            },
        }

        let transaction_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let unit = header[6];

        // Length counts the unit id plus the PDU.
        if length < 2 || length - 1 > MAX_PDU_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid mbap length {length}"),
            ));
        }

        let mut pdu = vec![0u8; length - 1];
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
            read = stream.read_exact(&mut pdu) => {
                read?;
            }
        }

        if protocol_id != MODBUS_PROTOCOL_ID {
            debug!("dropping frame with protocol id {protocol_id}");
            continue;
        }
        if unit != unit_id {
            debug!("dropping frame for unit {unit}");
            continue;
        }

        let response = handle_pdu(service.as_ref(), &pdu);
        stream
            .write_all(&encode_frame(transaction_id, unit, &response))
            .await?;
    }
}

fn encode_frame(transaction_id: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&MODBUS_PROTOCOL_ID.to_be_bytes());
    // PDUs are capped at MAX_PDU_LEN so this always fits.
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit);
    frame.extend_from_slice(pdu);
    frame
}

/// Executes one request PDU and returns the response PDU, which is an
/// exception response when the request fails.
pub fn handle_pdu(service: &dyn ThermostatService, pdu: &[u8]) -> Vec<u8> {
    let Some((&function, data)) = pdu.split_first() else {
        return vec![0x80, Exception::IllegalFunction as u8];
    };

    let result = match function {
        FN_READ_COILS => read_coils(service, data),
        FN_READ_HOLDING_REGISTERS => read_holding_registers(service, data),
        FN_READ_INPUT_REGISTERS => read_input_registers(service, data),
        FN_WRITE_SINGLE_COIL => write_single_coil(service, data),
        FN_WRITE_SINGLE_REGISTER => write_single_register(service, data),
        FN_WRITE_MULTIPLE_REGISTERS => write_multiple_registers(service, data),
        _ => Err(Exception::IllegalFunction),
    };

    match result {
        Ok(body) => {
            let mut response = Vec::with_capacity(body.len() + 1);
            response.push(function);
            response.extend_from_slice(&body);
            response
        }
        Err(exception) => {
            debug!("modbus function {function:#04x} failed: {exception:?}");
            vec![function | 0x80, exception as u8]
        }
    }
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, Exception> {
    data.get(offset..offset + 2)
        .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
        .ok_or(Exception::IllegalDataValue)
}

/// Decodes `start | quantity` and checks it against a table of `count`
/// entries.
fn read_range(data: &[u8], max_quantity: u16, count: u16) -> Result<(u16, u16), Exception> {
    if data.len() != 4 {
        return Err(Exception::IllegalDataValue);
    }
    let start = read_u16(data, 0)?;
    let quantity = read_u16(data, 2)?;
    if quantity == 0 || quantity > max_quantity {
        return Err(Exception::IllegalDataValue);
    }
    if u32::from(start) + u32::from(quantity) > u32::from(count) {
        return Err(Exception::IllegalDataAddress);
    }
    Ok((start, quantity))
}

fn read_coils(service: &dyn ThermostatService, data: &[u8]) -> Result<Vec<u8>, Exception> {
    let (start, quantity) = read_range(data, MAX_READ_BITS, COIL_COUNT)?;
    let coils = [service.get().enabled];

    let byte_count = usize::from(quantity).div_ceil(8);
    let mut body = vec![0u8; byte_count + 1];
    body[0] = byte_count as u8;
    for (bit, &on) in coils[usize::from(start)..][..usize::from(quantity)]
        .iter()
        .enumerate()
    {
        if on {
            body[1 + bit / 8] |= 1 << (bit % 8);
        }
    }
    Ok(body)
}

fn read_holding_registers(
    service: &dyn ThermostatService,
    data: &[u8],
) -> Result<Vec<u8>, Exception> {
    let (start, quantity) = read_range(data, MAX_READ_REGISTERS, HOLDING_REGISTER_COUNT)?;
    let snapshot = service.get();
    let registers = [
        encode_temperature(snapshot.temperature_setpoint),
        encode_temperature(snapshot.temperature_setpoint_min),
        encode_temperature(snapshot.temperature_setpoint_max),
        snapshot.mode.code(),
        snapshot.fan_speed.code(),
    ];
    Ok(register_body(&registers[usize::from(start)..][..usize::from(quantity)]))
}

fn read_input_registers(
    service: &dyn ThermostatService,
    data: &[u8],
) -> Result<Vec<u8>, Exception> {
    let (start, quantity) = read_range(data, MAX_READ_REGISTERS, INPUT_REGISTER_COUNT)?;
    let registers = [encode_temperature(service.get().ambient_temperature)];
    Ok(register_body(&registers[usize::from(start)..][..usize::from(quantity)]))
}

fn register_body(registers: &[u16]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + registers.len() * 2);
    body.push((registers.len() * 2) as u8);
    for register in registers {
        body.extend_from_slice(&register.to_be_bytes());
    }
    body
}

fn write_single_coil(service: &dyn ThermostatService, data: &[u8]) -> Result<Vec<u8>, Exception> {
    if data.len() != 4 {
        return Err(Exception::IllegalDataValue);
    }
    let address = read_u16(data, 0)?;
    let value = read_u16(data, 2)?;

    if address != COIL_ENABLED {
        return Err(Exception::IllegalDataAddress);
    }
    let on = match value {
        COIL_ON => true,
        COIL_OFF => false,
        _ => return Err(Exception::IllegalDataValue),
    };

    service.set_enabled(on);
    Ok(data.to_vec())
}

fn write_single_register(
    service: &dyn ThermostatService,
    data: &[u8],
) -> Result<Vec<u8>, Exception> {
    if data.len() != 4 {
        return Err(Exception::IllegalDataValue);
    }
    let address = read_u16(data, 0)?;
    let value = read_u16(data, 2)?;

    if address >= HOLDING_REGISTER_COUNT {
        return Err(Exception::IllegalDataAddress);
    }
    write_register(service, address, value)?;
    Ok(data.to_vec())
}

/// The whole address range is checked up front. Registers are then applied
/// in order and the first rejected one stops the write; earlier registers
/// stay applied.
fn write_multiple_registers(
    service: &dyn ThermostatService,
    data: &[u8],
) -> Result<Vec<u8>, Exception> {
    if data.len() < 5 {
        return Err(Exception::IllegalDataValue);
    }
    let start = read_u16(data, 0)?;
    let quantity = read_u16(data, 2)?;
    let byte_count = usize::from(data[4]);
    let values = &data[5..];

    if quantity == 0
        || quantity > MAX_WRITE_REGISTERS
        || byte_count != usize::from(quantity) * 2
        || values.len() != byte_count
    {
        return Err(Exception::IllegalDataValue);
    }
    if u32::from(start) + u32::from(quantity) > u32::from(HOLDING_REGISTER_COUNT) {
        return Err(Exception::IllegalDataAddress);
    }

    for (address, value) in (start..).zip(values.chunks_exact(2)) {
        write_register(service, address, u16::from_be_bytes([value[0], value[1]]))?;
    }

    Ok(data[..4].to_vec())
}

fn write_register(
    service: &dyn ThermostatService,
    address: u16,
    value: u16,
) -> Result<(), Exception> {
    match address {
        HR_SETPOINT => service.set_setpoint(decode_temperature(value))?,
        HR_SETPOINT_MIN => service.set_min(decode_temperature(value))?,
        HR_SETPOINT_MAX => service.set_max(decode_temperature(value))?,
        HR_MODE => service.set_mode(Mode::from_code(value))?,
        HR_FAN_SPEED => service.set_fan_speed(FanSpeed::from_code(value))?,
        _ => return Err(Exception::IllegalDataAddress),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::net::TcpStream;

    use super::*;
    use crate::testutil::{Call, FakeThermostatService};
    use thermocktat_common::{PidRegulatorParams, Snapshot, Thermostat};

    fn thermostat() -> Thermostat {
        Thermostat::new(
            Snapshot {
                enabled: true,
                temperature_setpoint: 22.0,
                temperature_setpoint_min: 16.0,
                temperature_setpoint_max: 28.0,
                mode: Mode::Auto,
                fan_speed: FanSpeed::Auto,
                ambient_temperature: 21.37,
            },
            PidRegulatorParams {
                kp: 0.1,
                ki: 0.01,
                kd: 0.05,
                target_hysteresis: 0.5,
                mode_change_hysteresis: 1.0,
            },
        )
        .unwrap()
    }

    fn exception(function: u8, exception: Exception) -> Vec<u8> {
        vec![function | 0x80, exception as u8]
    }

    #[test]
    fn temperature_fixed_point() {
        assert_eq!(encode_temperature(22.5), 2250);
        assert_eq!(encode_temperature(-5.25), (-525i16) as u16);
        assert_eq!(encode_temperature(21.004), 2100);
        assert_eq!(encode_temperature(1000.0), i16::MAX as u16);
        assert_eq!(encode_temperature(-1000.0), i16::MIN as u16);

        assert_eq!(decode_temperature(2250), 22.5);
        assert_eq!(decode_temperature((-525i16) as u16), -5.25);
    }

    #[test]
    fn reads_register_map() {
        let service = thermostat();

        assert_eq!(
            handle_pdu(&service, &[0x03, 0x00, 0x00, 0x00, 0x05]),
            vec![
                0x03, 10, // byte count
                0x08, 0x98, // 2200
                0x06, 0x40, // 1600
                0x0A, 0xF0, // 2800
                0x00, 0x04, // auto
                0x00, 0x01, // auto
            ]
        );
        assert_eq!(
            handle_pdu(&service, &[0x03, 0x00, 0x03, 0x00, 0x01]),
            vec![0x03, 2, 0x00, 0x04]
        );
        assert_eq!(
            handle_pdu(&service, &[0x04, 0x00, 0x00, 0x00, 0x01]),
            vec![0x04, 2, 0x08, 0x59]
        );
        assert_eq!(
            handle_pdu(&service, &[0x01, 0x00, 0x00, 0x00, 0x01]),
            vec![0x01, 1, 0x01]
        );

        service.set_enabled(false);
        assert_eq!(
            handle_pdu(&service, &[0x01, 0x00, 0x00, 0x00, 0x01]),
            vec![0x01, 1, 0x00]
        );
    }

    #[test]
    fn rejects_bad_reads() {
        let service = thermostat();

        let cases = [
            (vec![0x03, 0x00, 0x04, 0x00, 0x02], Exception::IllegalDataAddress),
            (vec![0x03, 0x00, 0x05, 0x00, 0x01], Exception::IllegalDataAddress),
            (vec![0x04, 0x00, 0x01, 0x00, 0x01], Exception::IllegalDataAddress),
            (vec![0x01, 0x00, 0x00, 0x00, 0x02], Exception::IllegalDataAddress),
            (vec![0x03, 0x00, 0x00, 0x00, 0x00], Exception::IllegalDataValue),
            (vec![0x03, 0x00, 0x00], Exception::IllegalDataValue),
        ];
        for (pdu, want) in cases {
            assert_eq!(handle_pdu(&service, &pdu), exception(pdu[0], want), "{pdu:?}");
        }

        assert_eq!(
            handle_pdu(&service, &[0x2B, 0x0E]),
            exception(0x2B, Exception::IllegalFunction)
        );
    }

    #[test]
    fn writes_coil_and_registers() {
        let service = FakeThermostatService::new();

        let request = [0x05, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(handle_pdu(&service, &request), request.to_vec());

        let request = [0x06, 0x00, 0x00, 0x09, 0x2E]; // 23.50
        assert_eq!(handle_pdu(&service, &request), request.to_vec());

        let request = [0x06, 0x00, 0x01, 0x07, 0x08]; // 18.00
        assert_eq!(handle_pdu(&service, &request), request.to_vec());

        let request = [0x06, 0x00, 0x02, 0x0A, 0x28]; // 26.00
        assert_eq!(handle_pdu(&service, &request), request.to_vec());

        let request = [0x06, 0x00, 0x03, 0x00, 0x02];
        assert_eq!(handle_pdu(&service, &request), request.to_vec());

        let request = [0x06, 0x00, 0x04, 0x00, 0x04];
        assert_eq!(handle_pdu(&service, &request), request.to_vec());

        assert_eq!(
            service.calls(),
            vec![
                Call::SetEnabled(false),
                Call::SetSetpoint(23.5),
                Call::SetMin(18.0),
                Call::SetMax(26.0),
                Call::SetMode(Mode::Cool),
                Call::SetFanSpeed(FanSpeed::High),
            ]
        );
    }

    #[test]
    fn rejects_bad_writes() {
        let service = thermostat();

        let cases = [
            (vec![0x05, 0x00, 0x01, 0xFF, 0x00], Exception::IllegalDataAddress),
            (vec![0x05, 0x00, 0x00, 0x12, 0x34], Exception::IllegalDataValue),
            (vec![0x06, 0x00, 0x05, 0x00, 0x00], Exception::IllegalDataAddress),
            // Setpoint 40.00 is above max.
            (vec![0x06, 0x00, 0x00, 0x0F, 0xA0], Exception::IllegalDataValue),
            // Min 30.00 above the current max.
            (vec![0x06, 0x00, 0x01, 0x0B, 0xB8], Exception::IllegalDataValue),
            (vec![0x06, 0x00, 0x03, 0x00, 0x00], Exception::IllegalDataValue),
            (vec![0x06, 0x00, 0x04, 0x00, 0x09], Exception::IllegalDataValue),
        ];
        for (pdu, want) in cases {
            assert_eq!(handle_pdu(&service, &pdu), exception(pdu[0], want), "{pdu:?}");
        }

        assert_eq!(service.get(), thermostat().get());
    }

    #[test]
    fn writes_multiple_registers_in_order() {
        let service = thermostat();

        // min 18.00, max 26.00 starting at register 1.
        let request = [0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x07, 0x08, 0x0A, 0x28];
        assert_eq!(
            handle_pdu(&service, &request),
            vec![0x10, 0x00, 0x01, 0x00, 0x02]
        );

        let snapshot = service.get();
        assert_eq!(snapshot.temperature_setpoint_min, 18.0);
        assert_eq!(snapshot.temperature_setpoint_max, 26.0);
    }

    #[test]
    fn multiple_register_write_stops_at_first_rejection() {
        let service = thermostat();

        // setpoint 24.00, then min 27.00 (above setpoint), then max 27.50.
        let request = [
            0x10, 0x00, 0x00, 0x00, 0x03, 0x06, 0x09, 0x60, 0x0A, 0x8C, 0x0A, 0xBE,
        ];
        assert_eq!(
            handle_pdu(&service, &request),
            exception(0x10, Exception::IllegalDataValue)
        );

        let snapshot = service.get();
        assert_eq!(snapshot.temperature_setpoint, 24.0);
        assert_eq!(snapshot.temperature_setpoint_min, 16.0);
        assert_eq!(snapshot.temperature_setpoint_max, 28.0);
    }

    #[test]
    fn multiple_register_write_checks_range_first() {
        let service = FakeThermostatService::new();

        let request = [0x10, 0x00, 0x04, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x01];
        assert_eq!(
            handle_pdu(&service, &request),
            exception(0x10, Exception::IllegalDataAddress)
        );

        let request = [0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x01, 0x00];
        assert_eq!(
            handle_pdu(&service, &request),
            exception(0x10, Exception::IllegalDataValue)
        );

        assert_eq!(service.calls(), Vec::new());
    }

    fn frame(transaction_id: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
        encode_frame(transaction_id, unit, pdu)
    }

    async fn read_frame(stream: &mut TcpStream) -> (u16, u8, Vec<u8>) {
        let mut header = [0u8; MBAP_HEADER_LEN];
        stream.read_exact(&mut header).await.unwrap();
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let mut pdu = vec![0u8; length - 1];
        stream.read_exact(&mut pdu).await.unwrap();
        (u16::from_be_bytes([header[0], header[1]]), header[6], pdu)
    }

    #[tokio::test]
    async fn serves_frames_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service: Arc<dyn ThermostatService> = Arc::new(thermostat());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, Arc::clone(&service), 7, shutdown_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Another unit id gets no answer, so the next response is for frame 2.
        client
            .write_all(&frame(1, 9, &[0x06, 0x00, 0x00, 0x09, 0x60]))
            .await
            .unwrap();
        client
            .write_all(&frame(2, 7, &[0x06, 0x00, 0x00, 0x08, 0xFC]))
            .await
            .unwrap();
        assert_eq!(
            read_frame(&mut client).await,
            (2, 7, vec![0x06, 0x00, 0x00, 0x08, 0xFC])
        );
        assert_eq!(service.get().temperature_setpoint, 23.0);

        client
            .write_all(&frame(3, 7, &[0x04, 0x00, 0x00, 0x00, 0x01]))
            .await
            .unwrap();
        assert_eq!(
            read_frame(&mut client).await,
            (3, 7, vec![0x04, 2, 0x08, 0x59])
        );

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("modbus server did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_invalid_mbap_length() {
        let (mut client, server) = tokio::io::duplex(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let service: Arc<dyn ThermostatService> = Arc::new(FakeThermostatService::new());
        let connection = tokio::spawn(handle_connection(server, service, 1, shutdown_rx));

        client
            .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01])
            .await
            .unwrap();

        let err = connection.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn stops_with_half_sent_frame_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service: Arc<dyn ThermostatService> = Arc::new(FakeThermostatService::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, service, 1, shutdown_rx));

        // Header announces a 5-byte PDU that never arrives.
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(3), server)
            .await
            .expect("modbus server did not stop")
            .unwrap()
            .unwrap();
        drop(client);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_backoff_waits_unless_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let started = tokio::time::Instant::now();
        assert!(!backoff(&mut shutdown_rx, ACCEPT_ERROR_BACKOFF).await);
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);

        let pending = tokio::spawn(async move {
            backoff(&mut shutdown_rx, Duration::from_secs(60)).await
        });
        tokio::task::yield_now().await;
        shutdown_tx.send(true).unwrap();

        let started = tokio::time::Instant::now();
        assert!(pending.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
