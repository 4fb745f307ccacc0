//! PDO handler: typed access to CiA 402 process data.
//!
//! [`ProcessImage`] is the master context. It owns the topology and the raw
//! input/output byte images; every slave owns one region in each. Typed
//! accessors check that the slave is a CiA 402 drive before touching memory,
//! so a rejected call never modifies anything.
//!
//! Inputs are written only by the fieldbus transport (`input_bytes_mut`),
//! outputs only by the slave's drive task (the setters or bulk [`ProcessImage::set`]).

use std::sync::Arc;

use cia402_common::consts::{MAX_IMAGE_SIZE, PDO_SIZE};
use cia402_common::error::PdoError;
use cia402_common::pdo::{InputField, OutputField, PdoInput, PdoOutput};
use cia402_common::slave::{PdoRegion, SlaveConfig};
use parking_lot::Mutex;

use crate::error::ImageError;
use crate::interfaces::PdoExchange;

/// Process image shared between the transport and the drive tasks.
pub type SharedImage = Arc<Mutex<ProcessImage>>;

/// Master context: topology plus input and output images.
#[derive(Debug, Clone)]
pub struct ProcessImage {
    slaves: Vec<SlaveConfig>,
    inputs: Vec<u8>,
    outputs: Vec<u8>,
}

impl ProcessImage {
    /// Build zeroed images sized to fit every region.
    ///
    /// Rejects duplicate ids, overlapping regions, regions past
    /// [`MAX_IMAGE_SIZE`] and CiA 402 regions that cannot hold a 36-byte PDO
    /// struct.
    pub fn new(slaves: Vec<SlaveConfig>) -> Result<Self, ImageError> {
        for (i, a) in slaves.iter().enumerate() {
            for (image, region) in [("input", a.input), ("output", a.output)] {
                if !region.fits(MAX_IMAGE_SIZE) {
                    return Err(ImageError::RegionOutOfBounds {
                        slave: a.id,
                        image,
                        offset: region.offset,
                        len: region.len,
                        limit: MAX_IMAGE_SIZE,
                    });
                }
            }
            if a.is_cia402() {
                for (image, region) in [("input", a.input), ("output", a.output)] {
                    if region.len < PDO_SIZE {
                        return Err(ImageError::RegionTooSmall {
                            slave: a.id,
                            image,
                            len: region.len,
                            required: PDO_SIZE,
                        });
                    }
                }
            }
            for b in &slaves[i + 1..] {
                if a.id == b.id {
                    return Err(ImageError::DuplicateSlave(a.id));
                }
                if a.input.overlaps(&b.input) {
                    return Err(ImageError::Overlap {
                        image: "input",
                        a: a.id,
                        b: b.id,
                    });
                }
                if a.output.overlaps(&b.output) {
                    return Err(ImageError::Overlap {
                        image: "output",
                        a: a.id,
                        b: b.id,
                    });
                }
            }
        }

        let input_len = slaves.iter().map(|s| s.input.end()).max().unwrap_or(0);
        let output_len = slaves.iter().map(|s| s.output.end()).max().unwrap_or(0);

        Ok(Self {
            slaves,
            inputs: vec![0; input_len],
            outputs: vec![0; output_len],
        })
    }

    /// Wrap into the shared form used across tasks.
    pub fn into_shared(self) -> SharedImage {
        Arc::new(Mutex::new(self))
    }

    /// Topology.
    pub fn slaves(&self) -> &[SlaveConfig] {
        &self.slaves
    }

    /// Look up a slave record.
    pub fn slave(&self, id: u16) -> Result<&SlaveConfig, PdoError> {
        self.slaves
            .iter()
            .find(|s| s.id == id)
            .ok_or(PdoError::UnknownSlave { slave: id })
    }

    /// Look up a slave and require it to be a CiA 402 drive.
    fn cia402(&self, id: u16) -> Result<SlaveConfig, PdoError> {
        let slave = *self.slave(id)?;
        if !slave.is_cia402() {
            return Err(PdoError::TypeMismatch {
                slave: id,
                actual: slave.slave_type,
            });
        }
        Ok(slave)
    }

    fn pdo_slice(bytes: &[u8], region: PdoRegion) -> &[u8; PDO_SIZE] {
        let slice = &bytes[region.offset..region.offset + PDO_SIZE];
        // Region length was checked against PDO_SIZE at construction.
        slice.try_into().unwrap_or(&[0; PDO_SIZE])
    }

    fn read_input(&self, id: u16, field: InputField) -> Result<u32, PdoError> {
        let slave = self.cia402(id)?;
        let at = slave.input.offset + field.offset();
        let b = &self.inputs[at..at + 4];
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn write_output(&mut self, id: u16, field: OutputField, value: u32) -> Result<(), PdoError> {
        let slave = self.cia402(id)?;
        let at = slave.output.offset + field.offset();
        self.outputs[at..at + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    // ─── Input accessors ────────────────────────────────────────────

    pub fn get_statusword(&self, id: u16) -> Result<u32, PdoError> {
        self.read_input(id, InputField::Statusword)
    }

    pub fn get_opmode_display(&self, id: u16) -> Result<u32, PdoError> {
        self.read_input(id, InputField::OpmodeDisplay)
    }

    pub fn get_position(&self, id: u16) -> Result<u32, PdoError> {
        self.read_input(id, InputField::ActualPosition)
    }

    pub fn get_velocity(&self, id: u16) -> Result<u32, PdoError> {
        self.read_input(id, InputField::ActualVelocity)
    }

    pub fn get_torque(&self, id: u16) -> Result<u32, PdoError> {
        self.read_input(id, InputField::ActualTorque)
    }

    pub fn get_user1_in(&self, id: u16) -> Result<u32, PdoError> {
        self.read_input(id, InputField::UserIn1)
    }

    pub fn get_user2_in(&self, id: u16) -> Result<u32, PdoError> {
        self.read_input(id, InputField::UserIn2)
    }

    pub fn get_user3_in(&self, id: u16) -> Result<u32, PdoError> {
        self.read_input(id, InputField::UserIn3)
    }

    pub fn get_user4_in(&self, id: u16) -> Result<u32, PdoError> {
        self.read_input(id, InputField::UserIn4)
    }

    /// Bulk read of the whole input struct.
    pub fn get(&self, id: u16) -> Result<PdoInput, PdoError> {
        let slave = self.cia402(id)?;
        Ok(PdoInput::from_bytes(Self::pdo_slice(
            &self.inputs,
            slave.input,
        )))
    }

    // ─── Output accessors ───────────────────────────────────────────

    pub fn set_controlword(&mut self, id: u16, controlword: u32) -> Result<(), PdoError> {
        self.write_output(id, OutputField::Controlword, controlword)
    }

    pub fn set_opmode(&mut self, id: u16, opmode: u32) -> Result<(), PdoError> {
        self.write_output(id, OutputField::Opmode, opmode)
    }

    pub fn set_position(&mut self, id: u16, position: u32) -> Result<(), PdoError> {
        self.write_output(id, OutputField::TargetPosition, position)
    }

    pub fn set_velocity(&mut self, id: u16, velocity: u32) -> Result<(), PdoError> {
        self.write_output(id, OutputField::TargetVelocity, velocity)
    }

    pub fn set_torque(&mut self, id: u16, torque: u32) -> Result<(), PdoError> {
        self.write_output(id, OutputField::TargetTorque, torque)
    }

    pub fn set_user1_out(&mut self, id: u16, user_out: u32) -> Result<(), PdoError> {
        self.write_output(id, OutputField::UserOut1, user_out)
    }

    pub fn set_user2_out(&mut self, id: u16, user_out: u32) -> Result<(), PdoError> {
        self.write_output(id, OutputField::UserOut2, user_out)
    }

    pub fn set_user3_out(&mut self, id: u16, user_out: u32) -> Result<(), PdoError> {
        self.write_output(id, OutputField::UserOut3, user_out)
    }

    pub fn set_user4_out(&mut self, id: u16, user_out: u32) -> Result<(), PdoError> {
        self.write_output(id, OutputField::UserOut4, user_out)
    }

    /// Bulk write of the whole output struct.
    pub fn set(&mut self, id: u16, pdo_output: &PdoOutput) -> Result<(), PdoError> {
        let slave = self.cia402(id)?;
        let at = slave.output.offset;
        self.outputs[at..at + PDO_SIZE].copy_from_slice(&pdo_output.to_bytes());
        Ok(())
    }

    /// Read back the output struct last written for a slave.
    pub fn get_output(&self, id: u16) -> Result<PdoOutput, PdoError> {
        let slave = self.cia402(id)?;
        Ok(PdoOutput::from_bytes(Self::pdo_slice(
            &self.outputs,
            slave.output,
        )))
    }

    // ─── Transport side ─────────────────────────────────────────────

    /// Raw input region of any slave, for the transport to fill.
    pub fn input_bytes_mut(&mut self, id: u16) -> Result<&mut [u8], PdoError> {
        let region = self.slave(id)?.input;
        Ok(&mut self.inputs[region.offset..region.end()])
    }

    /// Raw output region of any slave, for the transport to send.
    pub fn output_bytes(&self, id: u16) -> Result<&[u8], PdoError> {
        let region = self.slave(id)?.output;
        Ok(&self.outputs[region.offset..region.end()])
    }

    /// Whole output image.
    pub fn output_image(&self) -> &[u8] {
        &self.outputs
    }
}

/// One drive's view of the shared process image.
///
/// Each exchange takes the lock once and moves the whole struct, so a drive
/// task never observes a half-updated input frame.
#[derive(Debug, Clone)]
pub struct SlavePdoLink {
    image: SharedImage,
    slave: u16,
}

impl SlavePdoLink {
    pub fn new(image: SharedImage, slave: u16) -> Self {
        Self { image, slave }
    }
}

impl PdoExchange for SlavePdoLink {
    fn slave_id(&self) -> u16 {
        self.slave
    }

    fn read_inputs(&mut self) -> Result<PdoInput, PdoError> {
        self.image.lock().get(self.slave)
    }

    fn write_outputs(&mut self, outputs: &PdoOutput) -> Result<(), PdoError> {
        self.image.lock().set(self.slave, outputs)
    }
}
