//! Integration test: typed PDO access on a mixed topology.

use cia402_common::error::PdoError;
use cia402_common::pdo::{PdoInput, PdoOutput};
use cia402_common::slave::SlaveType;
use cia402_drive::interfaces::PdoExchange;
use cia402_drive::pdo::{ProcessImage, SlavePdoLink};

use super::common::{DRIVE, IO, topology};

fn image() -> ProcessImage {
    ProcessImage::new(topology()).unwrap()
}

const MISMATCH: PdoError = PdoError::TypeMismatch {
    slave: IO,
    actual: SlaveType::DigitalIo,
};

fn output_with(value: u32) -> PdoOutput {
    PdoOutput {
        controlword: value,
        opmode: value,
        target_position: value,
        target_velocity: value,
        target_torque: value,
        user_out_1: value,
        user_out_2: value,
        user_out_3: value,
        user_out_4: value,
    }
}

// ── Type checking ───────────────────────────────────────────────────

#[test]
fn every_accessor_rejects_non_drive_slave() {
    let mut image = image();
    image.set(DRIVE, &output_with(0xA5A5_A5A5)).unwrap();
    let before = image.output_image().to_vec();

    let getters: [fn(&ProcessImage, u16) -> Result<u32, PdoError>; 9] = [
        ProcessImage::get_statusword,
        ProcessImage::get_opmode_display,
        ProcessImage::get_position,
        ProcessImage::get_velocity,
        ProcessImage::get_torque,
        ProcessImage::get_user1_in,
        ProcessImage::get_user2_in,
        ProcessImage::get_user3_in,
        ProcessImage::get_user4_in,
    ];
    for get in getters {
        assert_eq!(get(&image, IO), Err(MISMATCH));
    }

    let setters: [fn(&mut ProcessImage, u16, u32) -> Result<(), PdoError>; 9] = [
        ProcessImage::set_controlword,
        ProcessImage::set_opmode,
        ProcessImage::set_position,
        ProcessImage::set_velocity,
        ProcessImage::set_torque,
        ProcessImage::set_user1_out,
        ProcessImage::set_user2_out,
        ProcessImage::set_user3_out,
        ProcessImage::set_user4_out,
    ];
    for set in setters {
        assert_eq!(set(&mut image, IO, 0xFFFF_FFFF), Err(MISMATCH));
        assert_eq!(image.output_image(), before.as_slice());
    }

    assert_eq!(image.get(IO), Err(MISMATCH));
    assert_eq!(image.get_output(IO), Err(MISMATCH));
    assert_eq!(image.set(IO, &output_with(1)), Err(MISMATCH));
    assert_eq!(image.output_image(), before.as_slice());
}

#[test]
fn unknown_slave_rejected() {
    let mut image = image();
    let before = image.output_image().to_vec();
    assert_eq!(
        image.set_velocity(9, 1),
        Err(PdoError::UnknownSlave { slave: 9 })
    );
    assert_eq!(image.get(9), Err(PdoError::UnknownSlave { slave: 9 }));
    assert_eq!(image.output_image(), before.as_slice());
}

#[test]
fn transport_may_fill_any_slave() {
    let mut image = image();
    image.input_bytes_mut(IO).unwrap().copy_from_slice(&[1, 2, 3, 4]);
    assert_eq!(image.output_bytes(IO).unwrap().len(), 4);
    // Terminal bytes never leak into the drive's struct.
    assert_eq!(image.get(DRIVE).unwrap(), PdoInput::default());
}

// ── Round trips ─────────────────────────────────────────────────────

#[test]
fn bulk_set_then_get_round_trips() {
    for value in [0, 1, 0xFFFF_FFFF] {
        let mut image = image();
        let out = output_with(value);
        image.set(DRIVE, &out).unwrap();
        assert_eq!(image.get_output(DRIVE).unwrap(), out, "value {value:#x}");
    }
}

#[test]
fn single_field_setters_round_trip() {
    for value in [0, 1, 0xFFFF_FFFF] {
        let mut image = image();
        image.set_controlword(DRIVE, value).unwrap();
        image.set_opmode(DRIVE, value).unwrap();
        image.set_position(DRIVE, value).unwrap();
        image.set_velocity(DRIVE, value).unwrap();
        image.set_torque(DRIVE, value).unwrap();
        image.set_user1_out(DRIVE, value).unwrap();
        image.set_user2_out(DRIVE, value).unwrap();
        image.set_user3_out(DRIVE, value).unwrap();
        image.set_user4_out(DRIVE, value).unwrap();
        assert_eq!(image.get_output(DRIVE).unwrap(), output_with(value));
    }
}

#[test]
fn input_getters_read_each_field() {
    for value in [0u32, 1, 0xFFFF_FFFF] {
        let mut image = image();
        let input = PdoInput {
            statusword: value,
            opmode_display: value,
            actual_torque: value,
            actual_position: value,
            actual_velocity: value,
            user_in_1: value,
            user_in_2: value,
            user_in_3: value,
            user_in_4: value,
        };
        image
            .input_bytes_mut(DRIVE)
            .unwrap()
            .copy_from_slice(&input.to_bytes());

        assert_eq!(image.get(DRIVE).unwrap(), input);
        assert_eq!(image.get_statusword(DRIVE), Ok(value));
        assert_eq!(image.get_opmode_display(DRIVE), Ok(value));
        assert_eq!(image.get_position(DRIVE), Ok(value));
        assert_eq!(image.get_velocity(DRIVE), Ok(value));
        assert_eq!(image.get_torque(DRIVE), Ok(value));
        assert_eq!(image.get_user1_in(DRIVE), Ok(value));
        assert_eq!(image.get_user2_in(DRIVE), Ok(value));
        assert_eq!(image.get_user3_in(DRIVE), Ok(value));
        assert_eq!(image.get_user4_in(DRIVE), Ok(value));
    }
}

// ── Shared link ─────────────────────────────────────────────────────

#[test]
fn link_on_terminal_fails_without_writing() {
    let image = image().into_shared();
    let before = image.lock().output_image().to_vec();
    let mut link = SlavePdoLink::new(image.clone(), IO);

    assert_eq!(link.slave_id(), IO);
    assert_eq!(link.read_inputs(), Err(MISMATCH));
    assert_eq!(link.write_outputs(&output_with(7)), Err(MISMATCH));
    assert_eq!(image.lock().output_image(), before.as_slice());
}
