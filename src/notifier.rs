use tracing::{info, warn};

use crate::admins::AdminSet;
use crate::delivery::DeliveryDispatcher;

/// Identity reported by the platform once the receive loop is connected.
#[derive(Debug, Clone, PartialEq)]
pub struct BotIdentity {
    pub id: u64,
    pub username: String,
}

/// Tell every admin the bot is up. Best-effort: failures are logged and
/// never abort startup. Returns how many admins were reached.
pub async fn announce(
    dispatcher: &DeliveryDispatcher,
    admins: &AdminSet,
    identity: &BotIdentity,
    template: &str,
) -> usize {
    let text = template.replace("{username}", &identity.username);
    let mut reached = 0;
    for admin in admins.iter() {
        match dispatcher.send_text(admin.0, &text).await {
            Ok(()) => reached += 1,
            Err(e) => warn!(admin_id = %admin, error = %e, "Startup announcement not delivered"),
        }
    }
    info!("Startup announcement reached {}/{} admins", reached, admins.len());
    reached
}
