use crate::errors::{ChannelError, DeviceError, Fault, SessionError};

/// Errors of record.
///
/// Each category keeps the most recent error until it is reset explicitly or implicitly: starting a
/// session clears channel and session errors, selecting a device clears the error of its
/// direction.
#[derive(Clone, Debug, Default)]
pub struct ErrorLatch {
    input: Option<DeviceError>,
    output: Option<DeviceError>,
    channel: Option<ChannelError>,
    session: Option<SessionError>,
}

impl ErrorLatch {
    /// Last input device error.
    pub fn input(&self) -> Option<&DeviceError> {
        self.input.as_ref()
    }

    /// Last output device error.
    pub fn output(&self) -> Option<&DeviceError> {
        self.output.as_ref()
    }

    /// Last channel error.
    pub fn channel(&self) -> Option<&ChannelError> {
        self.channel.as_ref()
    }

    /// Last session error.
    pub fn session(&self) -> Option<&SessionError> {
        self.session.as_ref()
    }

    /// Returns `true` if no errors are latched.
    pub fn is_empty(&self) -> bool {
        self.input.is_none()
            && self.output.is_none()
            && self.channel.is_none()
            && self.session.is_none()
    }

    pub(super) fn latch(&mut self, fault: &Fault) {
        match fault {
            Fault::InputDevice(err) => self.input = Some(err.clone()),
            Fault::OutputDevice(err) => self.output = Some(err.clone()),
            Fault::Channel(err) => self.channel = Some(err.clone()),
            Fault::Session(err) => self.session = Some(err.clone()),
        }
    }

    pub(super) fn reset_input(&mut self) {
        self.input = None;
    }

    pub(super) fn reset_output(&mut self) {
        self.output = None;
    }

    pub(super) fn reset_channel(&mut self) {
        self.channel = None;
    }

    pub(super) fn reset_session(&mut self) {
        self.session = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_independent() {
        let mut latch = ErrorLatch::default();
        assert!(latch.is_empty());

        latch.latch(&Fault::OutputDevice(DeviceError::NotOpen));
        latch.latch(&Fault::Channel(ChannelError::PeerClosed));
        assert!(latch.output().is_some());
        assert!(latch.channel().is_some());
        assert!(latch.input().is_none());

        latch.reset_channel();
        assert!(latch.channel().is_none());
        assert!(latch.output().is_some());

        latch.reset_output();
        assert!(latch.is_empty());
    }
}
