// SPDX-License-Identifier: BSD-3-Clause

//! Filename template expansion (§4.7.1 step 1): `{exposure_no}`,
//! `{controller}`, `{observatory}`, `{hemisphere}` placeholders.

use crate::cfg::config::Observatory;

/// The fields available to a filename template, per device per exposure.
#[derive(Debug, Clone)]
pub struct TemplateFields<'a> {
    pub exposure_no: u64,
    pub controller: &'a str,
    pub observatory: Observatory,
}

impl TemplateFields<'_> {
    pub fn expand(&self, template: &str) -> String {
        let observatory = match self.observatory {
            Observatory::Apo => "apo",
            Observatory::Lco => "lco",
        };
        template
            .replace("{exposure_no}", &self.exposure_no.to_string())
            .replace("{controller}", self.controller)
            .replace("{observatory}", observatory)
            .replace("{hemisphere}", self.observatory.hemisphere())
    }
}
