//! Registration of CSP client-side scripts.
//!
//! The extra-options emitter that delivers these to clients lives outside
//! this suite; subsystems only register their scripts here at startup.

use log::debug;

pub struct CspScriptProvider {
    scripts: Vec<(String, Vec<u8>)>,
}

impl CspScriptProvider {
    pub fn new() -> Self {
        Self {
            scripts: Vec::new(),
        }
    }

    pub fn add_script(&mut self, content: impl Into<Vec<u8>>, name: impl Into<String>) {
        let name = name.into();
        debug!("Registered client script {}", name);
        self.scripts.push((name, content.into()));
    }

    pub fn scripts(&self) -> &[(String, Vec<u8>)] {
        &self.scripts
    }
}

impl Default for CspScriptProvider {
    fn default() -> Self {
        Self::new()
    }
}
