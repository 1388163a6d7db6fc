use async_trait::async_trait;

use super::{Command, CommandError, Response};
use crate::daemon::Daemon;
use crate::xml::{close_tag, open_tag, Element};

/// `<get_vts>`: stream the VT catalogue, optionally narrowed to one id or a
/// filter expression. The response is emitted as fragments so the full
/// catalogue never has to be buffered; concatenating the fragments yields
/// one well-formed document.
pub struct GetVts;

#[async_trait]
impl Command for GetVts {
    fn name(&self) -> &'static str {
        "get_vts"
    }

    fn description(&self) -> &'static str {
        "List of available vulnerability tests."
    }

    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("vt_id", "ID of a specific vulnerability test to get."),
            ("filter", "Optional filter to get a specific VT collection."),
            ("details", "Whether to include full VT metadata."),
        ]
    }

    async fn handle(
        &self,
        daemon: &Daemon,
        request: &Element,
    ) -> Result<Response, CommandError> {
        let vt_id = request.get_attr("vt_id");
        let vt_filter = request.get_attr("filter");
        let details = request.get_attr("details") != Some("0");

        // All validation happens before the first fragment is produced; a
        // rejected request never leaves a partial stream behind.
        if let Some(id) = vt_id {
            if !daemon.vts().contains(id) {
                return Err(CommandError::with_status(
                    "get_vts",
                    404,
                    format!("Failed to find vulnerability test '{id}'"),
                ));
            }
        }

        let filtered = vt_filter.map(|f| daemon.vts().filter(f));

        let selection: Vec<String> = match (&filtered, vt_id) {
            (Some(ids), _) => ids.clone(),
            (None, Some(id)) => vec![id.to_string()],
            (None, None) => daemon.vts().ids(),
        };

        let mut vts_attrs: Vec<(&str, String)> =
            vec![("total", daemon.vts().len().to_string())];
        if let Some(ids) = &filtered {
            vts_attrs.push(("sent", ids.len().to_string()));
        }
        if let Some(hash) = daemon.vts().sha256_hash() {
            vts_attrs.push(("sha256_hash", hash.to_string()));
        }

        let prefix = vec![
            open_tag(
                "get_vts_response",
                &[("status", "200".to_string()), ("status_text", "OK".to_string())],
            ),
            open_tag("vts", &vts_attrs),
        ];
        let suffix = vec![close_tag("vts"), close_tag("get_vts_response")];

        // The collection is immutable after startup, so rendering each VT
        // lazily while the transport writes fragments is safe.
        let collection = daemon.vts_arc();
        let body = selection.into_iter().filter_map(move |id| {
            collection
                .get(&id)
                .map(|vt| collection.vt_xml(vt, details).render())
        });

        Ok(Response::Stream(Box::new(
            prefix.into_iter().chain(body).chain(suffix),
        )))
    }
}
