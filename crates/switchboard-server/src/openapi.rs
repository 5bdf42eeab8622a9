use utoipa::OpenApi;

use crate::routes;

#[derive(OpenApi)]
#[openapi(
    info(title = "Switchboard API", description = "Chat inbox with a streaming agent run gateway"),
    paths(
        routes::gateway::run_gateway,
        routes::agents::list_agents,
        routes::agents::agent_health,
        routes::threads::list_threads,
        routes::threads::create_thread,
        routes::threads::get_thread,
        routes::threads::thread_messages,
        routes::mock_agent::mock_agent,
    ),
    components(schemas(
        switchboard::model::Agent,
        switchboard::model::AgentStatus,
        switchboard::model::Thread,
        switchboard::model::ThreadStatus,
        switchboard::model::ThreadSummary,
        switchboard::model::Message,
        switchboard::model::MessageRole,
        switchboard::model::Run,
        switchboard::model::RunStatus,
        switchboard::gateway::RunRequest,
        switchboard::agent::AgentRunRequest,
        switchboard::agent::HistoryEntry,
        routes::agents::HealthReport,
        routes::threads::CreateThreadRequest,
        routes::threads::ThreadDetail,
    ))
)]
pub struct ApiDoc;
