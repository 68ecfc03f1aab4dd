use super::{Recorder, Scenario, ScenarioError, ScenarioReport};
use crate::fixtures::ServiceBusFixture;
use emulator_smoke_clients::ServiceBusMessage;
use std::time::Duration;
use uuid::Uuid;

/// Wait used to confirm the queue is empty after completing
const DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Send one message, receive exactly it, complete it, confirm nothing is left
///
/// The sender and receiver are closed on every path.
pub async fn service_bus_send_receive(
    fixture: &ServiceBusFixture,
    receive_wait: Duration,
) -> Result<ScenarioReport, ScenarioError> {
    let sender = fixture.client.sender(&fixture.queue);
    let receiver = fixture.client.receiver(&fixture.queue);

    let id = Uuid::new_v4().to_string();
    let message = ServiceBusMessage::new(format!("Test message {}", id)).with_message_id(id);

    let mut run = Recorder::new(Scenario::ServiceBusSendReceive);
    let result = async {
        run.step("send message", sender.send(&message)).await?;

        let received = run
            .step("receive message", receiver.receive(receive_wait))
            .await?;
        let received = match received {
            Some(received) => received,
            None => {
                return Err(ScenarioError::Mismatch {
                    step: "receive message",
                    expected: format!("{:?}", message.body),
                    actual: "no message".to_string(),
                })
            }
        };
        let body = received
            .body_text()
            .map_err(|source| ScenarioError::Step {
                step: "receive message",
                source,
            })?;
        run.expect_eq("receive message", message.body.as_str(), body)?;

        run.step("complete message", receiver.complete(&received))
            .await?;

        let leftover = run
            .step("receive after complete", receiver.receive(DRAIN_WAIT))
            .await?;
        run.expect_eq(
            "receive after complete",
            None,
            leftover.as_ref().map(|m| m.body.clone()),
        )?;
        Ok::<(), ScenarioError>(())
    }
    .await;

    sender.close().await;
    receiver.close().await;
    result.map(|()| run.finish())
}
